use serde::{Deserialize, Serialize};

use crate::Value;

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
///
/// This can be helpful to isolate errors in a subtree. e.g., if definition of one feature fails to
/// parse, the rest of the features are still usable.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}
impl<T> From<T> for TryParse<T> {
    fn from(value: T) -> TryParse<T> {
        TryParse::Parsed(value)
    }
}
impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// A feature flag: a default value and an ordered list of rules that may override it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    /// Value returned when no rule matches.
    #[serde(default)]
    pub default_value: Value,
    /// Rules are evaluated in order; the first rule that applies wins.
    #[serde(default)]
    pub rules: Vec<FeatureRule>,
}

/// A single feature rule. A rule with `force` set is a forced-value (or rollout) rule, otherwise it
/// describes an inline experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct FeatureRule {
    /// Optional rule id, reported back in [`FeatureResult::rule_id`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Targeting condition evaluated against user attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    /// Prerequisite features that must evaluate to matching values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_conditions: Option<Vec<ParentCondition>>,
    /// Fraction of users the rule applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    /// Value to force if the rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variations: Option<Vec<Value>>,
    /// Experiment key. Defaults to the feature key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_attribute: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_version: Option<i32>,
    #[serde(default)]
    pub disable_sticky_bucketing: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bucket_version: Option<i32>,
    /// Rollout range for forced rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<BucketRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<BucketRange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Vec<VariationMeta>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// An experiment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    /// Unique experiment key.
    pub key: String,
    /// Values of the variations. At least two are needed for the user to participate.
    #[serde(default)]
    pub variations: Vec<Value>,
    /// Traffic split between variations. Equal split if absent or invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    /// Fraction of eligible users included in the experiment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    /// Precomputed bucket ranges. Take precedence over `weights` and `coverage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<BucketRange>>,
    /// Targeting condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    /// Prerequisite features.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_conditions: Option<Vec<ParentCondition>>,
    /// Mutual-exclusion namespace. Ignored when `filters` are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<Namespace>,
    /// Forces all included users into this variation index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<i32>,
    /// User attribute used for hashing. Defaults to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_attribute: Option<String>,
    /// Attribute used when the hash attribute is empty and sticky bucketing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_attribute: Option<String>,
    /// Hashing algorithm version. Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_version: Option<i32>,
    /// Hash seed. Defaults to the experiment key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub disable_sticky_bucketing: bool,
    /// Version of sticky bucket assignments. Bumping it re-buckets users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_version: Option<i32>,
    /// Users with sticky assignments at or below this version are excluded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bucket_version: Option<i32>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<Filter>>,
    /// Per-variation metadata, indexed like `variations`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Vec<VariationMeta>>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Inactive experiments never include anyone.
    #[serde(default = "default_is_active", alias = "active")]
    pub is_active: bool,
}

fn default_is_active() -> bool {
    true
}

impl Experiment {
    /// Create an active experiment with the given key and variations and everything else unset.
    pub fn new(key: impl Into<String>, variations: Vec<Value>) -> Experiment {
        Experiment {
            key: key.into(),
            variations,
            weights: None,
            coverage: None,
            ranges: None,
            condition: None,
            parent_conditions: None,
            namespace: None,
            force: None,
            hash_attribute: None,
            fallback_attribute: None,
            hash_version: None,
            seed: None,
            disable_sticky_bucketing: false,
            bucket_version: None,
            min_bucket_version: None,
            filters: None,
            meta: None,
            name: None,
            phase: None,
            is_active: true,
        }
    }
}

/// A `[start, end)` slice of the unit hash space. Serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
#[allow(missing_docs)]
pub struct BucketRange {
    pub start: f64,
    pub end: f64,
}
impl BucketRange {
    pub(crate) fn contains(&self, n: f64) -> bool {
        self.start <= n && n < self.end
    }
}
impl From<(f64, f64)> for BucketRange {
    fn from((start, end): (f64, f64)) -> Self {
        BucketRange { start, end }
    }
}
impl From<BucketRange> for (f64, f64) {
    fn from(range: BucketRange) -> Self {
        (range.start, range.end)
    }
}

/// A named slice of the hash space. Experiments in the same namespace with non-overlapping ranges
/// never share users. Serialized as `[id, start, end]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, f64, f64)", into = "(String, f64, f64)")]
#[allow(missing_docs)]
pub struct Namespace {
    pub id: String,
    pub start: f64,
    pub end: f64,
}
impl From<(String, f64, f64)> for Namespace {
    fn from((id, start, end): (String, f64, f64)) -> Self {
        Namespace { id, start, end }
    }
}
impl From<Namespace> for (String, f64, f64) {
    fn from(namespace: Namespace) -> Self {
        (namespace.id, namespace.start, namespace.end)
    }
}

/// Hash-based inclusion filter. The user passes if their hash falls into any of the `ranges`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Filter {
    /// Attribute to hash. Defaults to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    pub seed: String,
    #[serde(default = "default_filter_hash_version")]
    pub hash_version: i32,
    pub ranges: Vec<BucketRange>,
}

fn default_filter_hash_version() -> i32 {
    2
}

/// Metadata for a single variation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationMeta {
    /// Stable variation key. Used in sticky bucket assignments and tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Passthrough variations are tracked, but a feature rule assigning one is skipped so the
    /// feature falls through to its next rule or default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<bool>,
}

/// A prerequisite: the feature `id` must evaluate to a value matching `condition`. The condition is
/// evaluated against `{"value": <feature value>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentCondition {
    /// Key of the prerequisite feature.
    pub id: String,
    /// Condition evaluated against `{"value": ...}`.
    pub condition: Value,
    /// A failing gate turns the whole feature off instead of skipping a single rule.
    #[serde(default)]
    pub gate: bool,
}
