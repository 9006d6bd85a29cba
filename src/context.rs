//! Evaluation context: definitions, per-user state, and client options.
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    models::{Experiment, Feature, TryParse},
    sticky_bucket::{StickyAssignmentsDocument, StickyBucketService},
    tracking::{TrackedExperiments, TrackingCallback},
    Result, Value,
};

/// Feature and experiment definitions.
///
/// Immutable once loaded. New definitions replace the old snapshot completely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalContext {
    /// When the definitions were received.
    #[serde(skip, default = "Utc::now")]
    pub fetched_at: DateTime<Utc>,
    #[allow(missing_docs)]
    #[serde(default)]
    pub features: HashMap<String, TryParse<Feature>>,
    /// Experiments evaluated by [`evaluate_experiments`](crate::eval::evaluate_experiments).
    #[serde(default)]
    pub experiments: Vec<TryParse<Experiment>>,
    /// Group id to list of values. Used by `$inGroup` and `$notInGroup`.
    #[serde(default)]
    pub saved_groups: Value,
}

impl Default for GlobalContext {
    fn default() -> Self {
        GlobalContext {
            fetched_at: Utc::now(),
            features: HashMap::new(),
            experiments: Vec::new(),
            saved_groups: Value::empty_object(),
        }
    }
}

impl GlobalContext {
    /// Decode definitions from the JSON payload:
    ///
    /// ```json
    /// {"features": {...}, "experiments": [...], "savedGroups": {...}}
    /// ```
    ///
    /// Individual features and experiments that fail to decode do not fail the payload. They
    /// are reported when evaluated.
    pub fn from_json(json: &str) -> Result<GlobalContext> {
        let context: GlobalContext = serde_json::from_str(json)?;
        Ok(context)
    }

    pub(crate) fn saved_groups(&self) -> Option<&Value> {
        Some(&self.saved_groups).filter(|groups| !groups.is_null())
    }
}

/// Per-user state.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    /// User attributes. Usually an object.
    pub attributes: Value,
    /// Sticky bucket documents keyed by `"{attribute_name}||{attribute_value}"`. Updated in place
    /// when assignments change.
    pub sticky_bucket_assignment_docs: HashMap<String, StickyAssignmentsDocument>,
    /// Experiment key to forced variation index.
    pub forced_variations: HashMap<String, i32>,
    /// Feature key to forced value.
    pub forced_feature_values: HashMap<String, Value>,
}

impl UserContext {
    /// Create a user context with the given attributes.
    ///
    /// ```
    /// # use growthbook_core::UserContext;
    /// # use serde_json::json;
    /// let user = UserContext::new(json!({"id": "123", "country": "US"}));
    /// ```
    pub fn new(attributes: impl Into<Value>) -> UserContext {
        UserContext {
            attributes: attributes.into(),
            ..UserContext::default()
        }
    }

    /// Force `experiment_key` to the given variation.
    pub fn force_variation(
        &mut self,
        experiment_key: impl Into<String>,
        variation: i32,
    ) -> &mut Self {
        self.forced_variations.insert(experiment_key.into(), variation);
        self
    }

    /// Force `feature_key` to the given value.
    pub fn force_feature_value(
        &mut self,
        feature_key: impl Into<String>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.forced_feature_values
            .insert(feature_key.into(), value.into());
        self
    }

    /// Add (or replace) sticky bucket documents.
    pub fn sticky_bucket_assignment_docs(
        &mut self,
        docs: impl IntoIterator<Item = StickyAssignmentsDocument>,
    ) -> &mut Self {
        self.sticky_bucket_assignment_docs
            .extend(docs.into_iter().map(|doc| (doc.key(), doc)));
        self
    }
}

/// Transient state of a single top-level evaluation.
#[derive(Debug, Clone, Default)]
pub struct StackContext {
    /// Features currently being evaluated. Used to detect prerequisite cycles.
    pub evaluated_features: HashSet<String>,
}

/// Client-level options.
#[derive(Clone)]
pub struct ClientOptions {
    pub(crate) enabled: bool,
    pub(crate) qa_mode: bool,
    pub(crate) url: Option<Url>,
    pub(crate) tracking_callback: Option<Arc<dyn TrackingCallback>>,
    pub(crate) tracked_experiments: Arc<TrackedExperiments>,
    pub(crate) sticky_bucket_service: Option<Arc<dyn StickyBucketService>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            enabled: true,
            qa_mode: false,
            url: None,
            tracking_callback: None,
            tracked_experiments: Arc::new(TrackedExperiments::new()),
            sticky_bucket_service: None,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("enabled", &self.enabled)
            .field("qa_mode", &self.qa_mode)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("tracking_callback", &self.tracking_callback.is_some())
            .field("tracked_experiments", &self.tracked_experiments.len())
            .field("sticky_bucket_service", &self.sticky_bucket_service.is_some())
            .finish()
    }
}

impl ClientOptions {
    /// Create default options: enabled, not in QA mode, no tracking, no sticky bucketing.
    pub fn new() -> ClientOptions {
        ClientOptions::default()
    }

    /// Globally enable or disable experiments. Disabled experiments never include anyone. Forced
    /// feature rules still apply.
    pub fn enabled(&mut self, enabled: bool) -> &mut Self {
        self.enabled = enabled;
        self
    }

    /// In QA mode, users are only included in experiments through forced variations.
    pub fn qa_mode(&mut self, qa_mode: bool) -> &mut Self {
        self.qa_mode = qa_mode;
        self
    }

    /// Set the current page URL. Query parameters named after an experiment key force the
    /// variation, e.g., `?my-experiment=1`.
    ///
    /// ```
    /// # use growthbook_core::ClientOptions;
    /// let mut options = ClientOptions::new();
    /// options.url("https://example.com/pricing?pricing-test=1")?;
    /// assert!(options.url("not a url").is_err());
    /// # Ok::<(), growthbook_core::Error>(())
    /// ```
    pub fn url(&mut self, url: &str) -> Result<&mut Self> {
        self.url = Some(Url::parse(url)?);
        Ok(self)
    }

    /// Set callback that receives experiment exposures.
    ///
    /// ```
    /// # use growthbook_core::ClientOptions;
    /// let mut options = ClientOptions::new();
    /// options.tracking_callback(|experiment: &growthbook_core::Experiment, result: &growthbook_core::ExperimentResult| {
    ///     println!("{} -> {}", experiment.key, result.key);
    /// });
    /// ```
    pub fn tracking_callback(&mut self, callback: impl TrackingCallback + 'static) -> &mut Self {
        self.tracking_callback = Some(Arc::new(callback));
        self
    }

    /// Share the set of already tracked exposures, e.g., between several option sets.
    pub fn tracked_experiments(&mut self, tracked: Arc<TrackedExperiments>) -> &mut Self {
        self.tracked_experiments = tracked;
        self
    }

    /// Enable sticky bucketing backed by `service`.
    pub fn sticky_bucket_service(
        &mut self,
        service: Arc<dyn StickyBucketService>,
    ) -> &mut Self {
        self.sticky_bucket_service = Some(service);
        self
    }

    #[allow(missing_docs)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[allow(missing_docs)]
    pub fn is_qa_mode(&self) -> bool {
        self.qa_mode
    }
}

/// Everything needed to evaluate features and experiments for a single user.
///
/// Evaluation functions borrow the context mutably: sticky bucket documents and the prerequisite
/// stack are updated as a side effect.
#[derive(Debug)]
pub struct EvalContext<'a> {
    #[allow(missing_docs)]
    pub global: &'a GlobalContext,
    #[allow(missing_docs)]
    pub user: &'a mut UserContext,
    #[allow(missing_docs)]
    pub stack: StackContext,
    #[allow(missing_docs)]
    pub options: &'a ClientOptions,
    sticky_bucket_updates: Vec<StickyAssignmentsDocument>,
}

impl<'a> EvalContext<'a> {
    #[allow(missing_docs)]
    pub fn new(
        global: &'a GlobalContext,
        user: &'a mut UserContext,
        options: &'a ClientOptions,
    ) -> EvalContext<'a> {
        EvalContext {
            global,
            user,
            stack: StackContext::default(),
            options,
            sticky_bucket_updates: Vec::new(),
        }
    }

    /// Documents changed since the last call. The caller is responsible for persisting them.
    pub fn take_sticky_bucket_updates(&mut self) -> Vec<StickyAssignmentsDocument> {
        std::mem::take(&mut self.sticky_bucket_updates)
    }

    pub(crate) fn update_sticky_bucket_doc(&mut self, key: String, doc: StickyAssignmentsDocument) {
        self.sticky_bucket_updates
            .retain(|pending| pending.key() != key);
        self.sticky_bucket_updates.push(doc.clone());
        self.user.sticky_bucket_assignment_docs.insert(key, doc);
    }
}
