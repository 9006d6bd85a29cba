use serde::{Deserialize, Serialize};

use crate::{models::Experiment, Value};

/// Result of experiment evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentResult {
    /// Whether the user is part of the experiment.
    pub in_experiment: bool,
    /// Index of the assigned variation. `0` when the user is not in the experiment.
    pub variation_id: usize,
    /// Value of the assigned variation.
    pub value: Value,
    /// Whether the variation was picked by hashing (as opposed to forced or excluded).
    pub hash_used: bool,
    /// Attribute used for hashing.
    pub hash_attribute: String,
    /// Value of the hash attribute. Empty if the user has no such attribute.
    pub hash_value: String,
    /// Key of the feature that triggered the experiment, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    /// Variation key: from variation meta, or the stringified index.
    pub key: String,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The user's hash for this experiment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<f64>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<bool>,
    /// Whether the variation came from a sticky bucket assignment.
    #[serde(default)]
    pub sticky_bucket_used: bool,
}

/// Source of a feature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeatureSource {
    /// The feature is not defined (or its definition is malformed).
    UnknownFeature,
    /// No rule matched.
    DefaultValue,
    /// A forced-value rule matched.
    Force,
    /// The user was included in an experiment rule.
    Experiment,
    /// Prerequisites form a cycle.
    CyclicPrerequisite,
    /// A gating prerequisite is not met.
    Prerequisite,
    /// The value is overridden in the user context.
    Override,
}

/// Result of feature evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureResult {
    /// Evaluated value.
    pub value: Value,
    /// `value.is_on()`
    pub on: bool,
    /// `!value.is_on()`
    pub off: bool,
    #[allow(missing_docs)]
    pub source: FeatureSource,
    /// Experiment the user was included in (for [`FeatureSource::Experiment`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<Experiment>,
    #[allow(missing_docs)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_result: Option<ExperimentResult>,
    /// Id of the matched rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl FeatureResult {
    pub(crate) fn new(value: Value, source: FeatureSource) -> FeatureResult {
        let on = value.is_on();
        FeatureResult {
            value,
            on,
            off: !on,
            source,
            experiment: None,
            experiment_result: None,
            rule_id: None,
        }
    }

    pub(crate) fn with_rule_id(mut self, rule_id: Option<&str>) -> FeatureResult {
        self.rule_id = rule_id.map(ToOwned::to_owned);
        self
    }

    #[allow(missing_docs)]
    pub fn is_on(&self) -> bool {
        self.on
    }

    #[allow(missing_docs)]
    pub fn is_off(&self) -> bool {
        self.off
    }
}
