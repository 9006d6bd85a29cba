use crate::{
    condition::eval_condition,
    context::EvalContext,
    hashing::hash,
    models::{Experiment, Feature, FeatureRule, TryParse},
    results::{FeatureResult, FeatureSource},
    Value,
};

use super::experiment::{
    attribute_string, eval_parent_conditions, is_filtered_out, run_experiment,
    ParentConditionsOutcome,
};

/// Evaluate the feature `feature_key` for the user.
///
/// Never fails: unknown or malformed features resolve to `null` with
/// [`FeatureSource::UnknownFeature`].
///
/// # Examples
/// ```
/// # use growthbook_core::{eval::evaluate_feature, ClientOptions, EvalContext, FeatureSource, GlobalContext, UserContext};
/// # use serde_json::json;
/// let global = GlobalContext::from_json(r#"{
///     "features": {
///         "new-checkout": {
///             "defaultValue": false,
///             "rules": [{"condition": {"country": "US"}, "force": true}]
///         }
///     }
/// }"#)?;
/// let options = ClientOptions::new();
/// let mut user = UserContext::new(json!({"id": "123", "country": "US"}));
/// let mut context = EvalContext::new(&global, &mut user, &options);
///
/// let result = evaluate_feature(&mut context, "new-checkout");
/// assert!(result.is_on());
/// assert_eq!(result.source, FeatureSource::Force);
/// # Ok::<(), growthbook_core::Error>(())
/// ```
pub fn evaluate_feature(context: &mut EvalContext, feature_key: &str) -> FeatureResult {
    context.stack.evaluated_features.clear();
    eval_feature(context, feature_key)
}

/// Evaluate a feature as part of an ongoing evaluation. Prerequisites call back into this
/// function, so the stack is used to detect cycles.
pub(super) fn eval_feature(context: &mut EvalContext, feature_key: &str) -> FeatureResult {
    if context.stack.evaluated_features.contains(feature_key) {
        log::warn!(target: "growthbook", feature_key; "cyclic prerequisite detected");
        return FeatureResult::new(Value::Null, FeatureSource::CyclicPrerequisite);
    }

    if let Some(value) = context.user.forced_feature_values.get(feature_key) {
        log::debug!(target: "growthbook", feature_key; "feature value overridden in user context");
        return FeatureResult::new(value.clone(), FeatureSource::Override);
    }

    let global = context.global;
    let feature = match global.features.get(feature_key) {
        Some(TryParse::Parsed(feature)) => feature,
        Some(TryParse::ParseFailed(_)) => {
            log::warn!(target: "growthbook", feature_key; "feature definition failed to parse, treating as unknown");
            return FeatureResult::new(Value::Null, FeatureSource::UnknownFeature);
        }
        None => {
            log::debug!(target: "growthbook", feature_key; "unknown feature");
            return FeatureResult::new(Value::Null, FeatureSource::UnknownFeature);
        }
    };

    context
        .stack
        .evaluated_features
        .insert(feature_key.to_owned());
    let result = eval_rules(context, feature_key, feature);
    context.stack.evaluated_features.remove(feature_key);

    log::trace!(target: "growthbook",
                feature_key,
                value:serde = result.value,
                source:? = result.source,
                rule_id = result.rule_id.as_deref();
                "evaluated feature");

    result
}

fn eval_rules(context: &mut EvalContext, feature_key: &str, feature: &Feature) -> FeatureResult {
    for rule in &feature.rules {
        let rule_id = rule.id.as_deref();

        if let Some(parents) = &rule.parent_conditions {
            match eval_parent_conditions(context, parents) {
                ParentConditionsOutcome::Met => {}
                ParentConditionsOutcome::Cyclic => {
                    return FeatureResult::new(Value::Null, FeatureSource::CyclicPrerequisite)
                        .with_rule_id(rule_id);
                }
                ParentConditionsOutcome::GateFailed => {
                    log::debug!(target: "growthbook", feature_key; "gating prerequisite not met");
                    return FeatureResult::new(Value::Null, FeatureSource::Prerequisite)
                        .with_rule_id(rule_id);
                }
                ParentConditionsOutcome::Failed => {
                    log::debug!(target: "growthbook", feature_key, rule_id; "skipping rule because prerequisite not met");
                    continue;
                }
            }
        }

        if let Some(condition) = &rule.condition {
            if !eval_condition(
                &context.user.attributes,
                condition,
                context.global.saved_groups(),
            ) {
                log::debug!(target: "growthbook", feature_key, rule_id; "skipping rule because condition not met");
                continue;
            }
        }

        if let Some(filters) = &rule.filters {
            if is_filtered_out(context, filters) {
                log::debug!(target: "growthbook", feature_key, rule_id; "skipping rule because user is filtered out");
                continue;
            }
        }

        if let Some(force) = &rule.force {
            if !is_included_in_rollout(context, feature_key, rule) {
                continue;
            }
            return FeatureResult::new(force.clone(), FeatureSource::Force).with_rule_id(rule_id);
        }

        let Some(variations) = &rule.variations else {
            log::debug!(target: "growthbook", feature_key, rule_id; "rule has neither force nor variations, skipping");
            continue;
        };

        let experiment = experiment_from_rule(feature_key, rule, variations.clone());
        let result = run_experiment(context, &experiment, Some(feature_key));
        if !result.in_experiment {
            continue;
        }
        if result.passthrough == Some(true) {
            log::debug!(target: "growthbook", feature_key, rule_id; "passthrough variation, skipping rule");
            continue;
        }

        return FeatureResult {
            experiment: Some(experiment),
            experiment_result: Some(result.clone()),
            ..FeatureResult::new(result.value, FeatureSource::Experiment).with_rule_id(rule_id)
        };
    }

    FeatureResult::new(feature.default_value.clone(), FeatureSource::DefaultValue)
}

/// Rollout range and coverage of a forced rule.
///
/// Users outside of `range` are skipped. Users whose `hash(feature_key, value, 1)` is above
/// `coverage` are skipped.
fn is_included_in_rollout(context: &EvalContext, feature_key: &str, rule: &FeatureRule) -> bool {
    if rule.range.is_none() && rule.coverage.is_none() {
        return true;
    }

    let hash_attribute = rule.hash_attribute.as_deref().unwrap_or("id");
    let hash_value = attribute_string(&context.user.attributes, hash_attribute);
    if hash_value.is_empty() {
        log::debug!(target: "growthbook", feature_key, hash_attribute; "skipping rollout because user has no hash attribute");
        return false;
    }

    if let Some(range) = &rule.range {
        let n = hash(
            rule.seed.as_deref().unwrap_or(feature_key),
            &hash_value,
            rule.hash_version.unwrap_or(1),
        );
        if !n.is_some_and(|n| range.contains(n)) {
            log::debug!(target: "growthbook", feature_key; "skipping rule because user is not in rollout range");
            return false;
        }
    }

    if let Some(coverage) = rule.coverage {
        let n = hash(feature_key, &hash_value, 1);
        if !n.is_some_and(|n| n <= coverage) {
            log::debug!(target: "growthbook", feature_key, coverage; "skipping rule because user is not covered");
            return false;
        }
    }

    true
}

/// Inline experiment described by an experiment rule. The key defaults to the feature key. The
/// rule's condition is evaluated by the caller.
fn experiment_from_rule(
    feature_key: &str,
    rule: &FeatureRule,
    variations: Vec<Value>,
) -> Experiment {
    Experiment {
        key: rule.key.clone().unwrap_or_else(|| feature_key.to_owned()),
        weights: rule.weights.clone(),
        coverage: rule.coverage,
        ranges: rule.ranges.clone(),
        namespace: rule.namespace.clone(),
        hash_attribute: rule.hash_attribute.clone(),
        fallback_attribute: rule.fallback_attribute.clone(),
        hash_version: rule.hash_version,
        seed: rule.seed.clone(),
        disable_sticky_bucketing: rule.disable_sticky_bucketing,
        bucket_version: rule.bucket_version,
        min_bucket_version: rule.min_bucket_version,
        filters: rule.filters.clone(),
        meta: rule.meta.clone(),
        name: rule.name.clone(),
        phase: rule.phase.clone(),
        ..Experiment::new("", variations)
    }
}
