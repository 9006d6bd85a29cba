//! Sticky bucketing: persisting a user's variation so that it survives later targeting changes.
//!
//! Assignments are stored per (attribute name, attribute value) pair in
//! [`StickyAssignmentsDocument`]s. Inside a document, the key is
//! `"{experiment_key}__{bucket_version}"` and the value is the variation key.
use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::{models::VariationMeta, Result, Value};

/// Sticky assignments of a single attribute value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyAssignmentsDocument {
    #[allow(missing_docs)]
    pub attribute_name: String,
    #[allow(missing_docs)]
    pub attribute_value: String,
    /// Experiment-version key to variation key.
    #[serde(default)]
    pub assignments: HashMap<String, String>,
}

impl StickyAssignmentsDocument {
    /// Create an empty document.
    pub fn new(
        attribute_name: impl Into<String>,
        attribute_value: impl Into<String>,
    ) -> StickyAssignmentsDocument {
        StickyAssignmentsDocument {
            attribute_name: attribute_name.into(),
            attribute_value: attribute_value.into(),
            assignments: HashMap::new(),
        }
    }

    /// Key of this document in [`UserContext::sticky_bucket_assignment_docs`].
    ///
    /// [`UserContext::sticky_bucket_assignment_docs`]: crate::UserContext::sticky_bucket_assignment_docs
    pub fn key(&self) -> String {
        document_key(&self.attribute_name, &self.attribute_value)
    }
}

/// `"{attribute_name}||{attribute_value}"`
pub fn document_key(attribute_name: &str, attribute_value: &str) -> String {
    format!("{attribute_name}||{attribute_value}")
}

/// `"{experiment_key}__{bucket_version}"`
pub fn experiment_bucket_key(experiment_key: &str, bucket_version: i32) -> String {
    format!("{experiment_key}__{bucket_version}")
}

/// Result of a sticky bucket lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StickyBucketVariation {
    /// Index of the previously assigned variation.
    pub variation: Option<usize>,
    /// User has an assignment in a version below the experiment's minimum bucket version and
    /// must be excluded.
    pub version_is_blocked: bool,
}

/// Key reported for the variation at `index`: `meta[index].key` when present, the stringified
/// index otherwise.
pub(crate) fn variation_key(meta: Option<&[VariationMeta]>, index: usize) -> String {
    meta.and_then(|meta| meta.get(index))
        .and_then(|meta| meta.key.clone())
        .unwrap_or_else(|| index.to_string())
}

/// Collect assignments from the documents of the hash attribute and the fallback attribute.
/// Hash attribute assignments take precedence.
pub fn get_sticky_bucket_assignments(
    docs: &HashMap<String, StickyAssignmentsDocument>,
    attributes: &Value,
    hash_attribute: &str,
    fallback_attribute: Option<&str>,
) -> HashMap<String, String> {
    let mut merged = HashMap::new();

    let lookup = |attribute: &str| {
        let value = attributes.get_path(attribute)?.to_primitive_string()?;
        docs.get(&document_key(attribute, &value))
    };

    if let Some(doc) = fallback_attribute.and_then(lookup) {
        merged.extend(doc.assignments.clone());
    }
    if let Some(doc) = lookup(hash_attribute) {
        merged.extend(doc.assignments.clone());
    }

    merged
}

/// Find a sticky variation for the experiment in `assignments`.
///
/// If `min_bucket_version > 0` and the user has an assignment in any version from `0` to
/// `min_bucket_version`, the user is blocked. Otherwise, the variation stored for
/// `bucket_version` is matched against variation keys. An unknown variation key is treated as no
/// assignment.
pub fn get_sticky_bucket_variation(
    assignments: &HashMap<String, String>,
    experiment_key: &str,
    bucket_version: i32,
    min_bucket_version: i32,
    num_variations: usize,
    meta: Option<&[VariationMeta]>,
) -> StickyBucketVariation {
    if min_bucket_version > 0 {
        let blocked = (0..=min_bucket_version)
            .any(|version| {
                assignments.contains_key(&experiment_bucket_key(experiment_key, version))
            });
        if blocked {
            return StickyBucketVariation {
                variation: None,
                version_is_blocked: true,
            };
        }
    }

    let Some(stored) = assignments.get(&experiment_bucket_key(experiment_key, bucket_version))
    else {
        return StickyBucketVariation::default();
    };

    let variation = (0..num_variations).find(|&index| variation_key(meta, index) == *stored);
    if variation.is_none() {
        log::debug!(target: "growthbook",
                    experiment_key,
                    variation_key = stored.as_str();
                    "sticky assignment does not match any variation, ignoring");
    }

    StickyBucketVariation {
        variation,
        version_is_blocked: false,
    }
}

/// Merge `new_assignments` into the existing document for the attribute (if any).
///
/// Existing assignments for other experiments are preserved. Returns the document key, the merged
/// document, and whether the merged document differs from the existing one.
pub fn generate_sticky_bucket_assignment_doc(
    docs: &HashMap<String, StickyAssignmentsDocument>,
    attribute_name: &str,
    attribute_value: &str,
    new_assignments: HashMap<String, String>,
) -> (String, StickyAssignmentsDocument, bool) {
    let key = document_key(attribute_name, attribute_value);
    let existing = docs.get(&key);

    let mut doc = existing
        .cloned()
        .unwrap_or_else(|| StickyAssignmentsDocument::new(attribute_name, attribute_value));
    doc.assignments.extend(new_assignments);

    let changed = existing.map_or(true, |existing| existing.assignments != doc.assignments);

    (key, doc, changed)
}

/// Persistent storage for sticky bucket documents.
///
/// Implementations must be thread-safe. Errors are logged by the evaluator and never fail an
/// evaluation.
pub trait StickyBucketService: Send + Sync {
    /// Load the document for a single attribute value.
    fn get_assignments(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Result<Option<StickyAssignmentsDocument>>;

    /// Store a document, replacing the previous one with the same key.
    fn save_assignments(&self, doc: &StickyAssignmentsDocument) -> Result<()>;

    /// Load documents for all `attributes` (attribute name to value), keyed by document key.
    fn get_all_assignments(
        &self,
        attributes: &HashMap<String, String>,
    ) -> Result<HashMap<String, StickyAssignmentsDocument>> {
        let mut docs = HashMap::new();
        for (name, value) in attributes {
            if let Some(doc) = self.get_assignments(name, value)? {
                docs.insert(doc.key(), doc);
            }
        }
        Ok(docs)
    }

    /// Drop all stored documents.
    fn clear(&self) -> Result<()>;
}

/// Process-local [`StickyBucketService`]. Mostly useful for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct InMemoryStickyBucketService {
    docs: RwLock<HashMap<String, StickyAssignmentsDocument>>,
}

impl InMemoryStickyBucketService {
    #[allow(missing_docs)]
    pub fn new() -> InMemoryStickyBucketService {
        InMemoryStickyBucketService::default()
    }
}

impl StickyBucketService for InMemoryStickyBucketService {
    fn get_assignments(
        &self,
        attribute_name: &str,
        attribute_value: &str,
    ) -> Result<Option<StickyAssignmentsDocument>> {
        let docs = self
            .docs
            .read()
            .expect("thread holding sticky bucket lock should not panic");
        Ok(docs.get(&document_key(attribute_name, attribute_value)).cloned())
    }

    fn save_assignments(&self, doc: &StickyAssignmentsDocument) -> Result<()> {
        let mut docs = self
            .docs
            .write()
            .expect("thread holding sticky bucket lock should not panic");
        docs.insert(doc.key(), doc.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.docs
            .write()
            .expect("thread holding sticky bucket lock should not panic")
            .clear();
        Ok(())
    }
}
