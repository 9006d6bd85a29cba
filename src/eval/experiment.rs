use std::collections::{BTreeMap, HashMap};

use url::Url;

use crate::{
    condition::eval_condition,
    context::EvalContext,
    hashing::{choose_variation, get_bucket_ranges, hash, in_namespace},
    models::{Experiment, Filter, ParentCondition, TryParse},
    results::{ExperimentResult, FeatureSource},
    sticky_bucket::{
        experiment_bucket_key, generate_sticky_bucket_assignment_doc,
        get_sticky_bucket_assignments, get_sticky_bucket_variation, variation_key,
        StickyBucketVariation,
    },
    Value,
};

use super::feature::eval_feature;

/// Evaluate `experiment` for the user.
///
/// Never fails: users that cannot be assigned get a result with `in_experiment == false` and the
/// first variation's value. Sticky bucket documents changed by the evaluation are written to the
/// user context and queued on `context` (see [`EvalContext::take_sticky_bucket_updates`]).
pub fn evaluate_experiment(context: &mut EvalContext, experiment: &Experiment) -> ExperimentResult {
    context.stack.evaluated_features.clear();
    run_experiment(context, experiment, None)
}

/// Evaluate all experiments from the global context. Returns experiment key and result pairs in
/// definition order.
pub fn evaluate_experiments(context: &mut EvalContext) -> Vec<(String, ExperimentResult)> {
    let global = context.global;
    global
        .experiments
        .iter()
        .filter_map(|experiment| match experiment {
            TryParse::Parsed(experiment) => Some(experiment),
            TryParse::ParseFailed(_) => {
                log::warn!(target: "growthbook", "skipping experiment that failed to parse");
                None
            }
        })
        .map(|experiment| {
            (
                experiment.key.clone(),
                evaluate_experiment(context, experiment),
            )
        })
        .collect()
}

pub(super) fn run_experiment(
    context: &mut EvalContext,
    experiment: &Experiment,
    feature_id: Option<&str>,
) -> ExperimentResult {
    let experiment_key = experiment.key.as_str();
    let num_variations = experiment.variations.len();
    let builder = ResultBuilder::new(context, experiment, feature_id);

    if num_variations < 2 {
        log::debug!(target: "growthbook", experiment_key; "experiment has less than 2 variations, skipping");
        return builder.not_in_experiment();
    }

    if !context.options.enabled {
        log::debug!(target: "growthbook", experiment_key; "experiments are disabled, skipping");
        return builder.not_in_experiment();
    }

    if let Some(variation) =
        query_string_override(context.options.url.as_ref(), experiment_key, num_variations)
    {
        log::debug!(target: "growthbook", experiment_key, variation; "variation forced via url");
        return builder.forced(variation as i64);
    }

    if let Some(&variation) = context.user.forced_variations.get(experiment_key) {
        log::debug!(target: "growthbook", experiment_key, variation; "variation forced in user context");
        return builder.forced(variation.into());
    }

    if !experiment.is_active {
        log::debug!(target: "growthbook", experiment_key; "experiment is not active, skipping");
        return builder.not_in_experiment();
    }

    if builder.hash_value.is_empty() {
        log::debug!(target: "growthbook",
                    experiment_key,
                    hash_attribute = builder.hash_attribute.as_str();
                    "user has no hash attribute, skipping");
        return builder.not_in_experiment();
    }

    let sticky = if builder.sticky_bucketing {
        let assignments = get_sticky_bucket_assignments(
            &context.user.sticky_bucket_assignment_docs,
            &context.user.attributes,
            experiment.hash_attribute.as_deref().unwrap_or("id"),
            experiment.fallback_attribute.as_deref(),
        );
        get_sticky_bucket_variation(
            &assignments,
            experiment_key,
            experiment.bucket_version.unwrap_or(0),
            experiment.min_bucket_version.unwrap_or(0),
            num_variations,
            experiment.meta.as_deref(),
        )
    } else {
        StickyBucketVariation::default()
    };
    let found_sticky_bucket = sticky.variation.is_some();

    // Sticky users bypass targeting so that later targeting changes do not re-bucket them.
    if !found_sticky_bucket && !is_targeted(context, experiment, &builder.hash_value) {
        return builder.not_in_experiment();
    }

    let Some(n) = hash(
        experiment.seed.as_deref().unwrap_or(experiment_key),
        &builder.hash_value,
        experiment.hash_version.unwrap_or(1),
    ) else {
        log::debug!(target: "growthbook",
                    experiment_key,
                    hash_version = experiment.hash_version.unwrap_or(1);
                    "unsupported hash version, skipping");
        return builder.not_in_experiment();
    };

    let assigned = sticky.variation.or_else(|| {
        let ranges = match &experiment.ranges {
            Some(ranges) => ranges.clone(),
            None => get_bucket_ranges(
                num_variations,
                experiment.coverage.unwrap_or(1.0),
                experiment.weights.as_deref(),
            ),
        };
        choose_variation(n, &ranges)
    });

    if sticky.version_is_blocked {
        log::debug!(target: "growthbook", experiment_key; "sticky bucket version is blocked, skipping");
        return ExperimentResult {
            sticky_bucket_used: true,
            ..builder.not_in_experiment()
        };
    }

    let Some(assigned) = assigned else {
        log::debug!(target: "growthbook", experiment_key; "user is not covered by the experiment, skipping");
        return builder.not_in_experiment();
    };

    if let Some(force) = experiment.force {
        return builder.forced(force.into());
    }

    if context.options.qa_mode {
        log::debug!(target: "growthbook", experiment_key; "qa mode, skipping");
        return builder.not_in_experiment();
    }

    let result = builder.build(Some(assigned), true, Some(n), found_sticky_bucket);

    if builder.sticky_bucketing {
        let (key, doc, changed) = generate_sticky_bucket_assignment_doc(
            &context.user.sticky_bucket_assignment_docs,
            &result.hash_attribute,
            &result.hash_value,
            HashMap::from([(
                experiment_bucket_key(experiment_key, experiment.bucket_version.unwrap_or(0)),
                result.key.clone(),
            )]),
        );
        if changed {
            context.update_sticky_bucket_doc(key, doc);
        }
    }

    track(context, experiment, &result);

    log::trace!(target: "growthbook",
                experiment_key,
                variation_id = result.variation_id,
                hash_value = result.hash_value.as_str();
                "assigned experiment variation");

    result
}

/// Namespace or filters, targeting condition, and prerequisites.
fn is_targeted(context: &mut EvalContext, experiment: &Experiment, hash_value: &str) -> bool {
    let experiment_key = experiment.key.as_str();

    if let Some(filters) = &experiment.filters {
        if is_filtered_out(context, filters) {
            log::debug!(target: "growthbook", experiment_key; "user is filtered out, skipping");
            return false;
        }
    } else if let Some(namespace) = &experiment.namespace {
        if !in_namespace(hash_value, namespace) {
            log::debug!(target: "growthbook",
                        experiment_key,
                        namespace = namespace.id.as_str();
                        "user is not in experiment namespace, skipping");
            return false;
        }
    }

    if let Some(condition) = &experiment.condition {
        if !eval_condition(
            &context.user.attributes,
            condition,
            context.global.saved_groups(),
        ) {
            log::debug!(target: "growthbook", experiment_key; "condition not met, skipping");
            return false;
        }
    }

    if let Some(parents) = &experiment.parent_conditions {
        match eval_parent_conditions(context, parents) {
            ParentConditionsOutcome::Met => {}
            ParentConditionsOutcome::Cyclic
            | ParentConditionsOutcome::Failed
            | ParentConditionsOutcome::GateFailed => {
                log::debug!(target: "growthbook", experiment_key; "prerequisites not met, skipping");
                return false;
            }
        }
    }

    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ParentConditionsOutcome {
    Met,
    Cyclic,
    /// A non-gating prerequisite failed.
    Failed,
    /// A gating prerequisite failed.
    GateFailed,
}

/// Evaluate prerequisite features and match their values against parent conditions.
pub(super) fn eval_parent_conditions(
    context: &mut EvalContext,
    parents: &[ParentCondition],
) -> ParentConditionsOutcome {
    for parent in parents {
        let parent_result = eval_feature(context, &parent.id);
        if parent_result.source == FeatureSource::CyclicPrerequisite {
            return ParentConditionsOutcome::Cyclic;
        }

        let evaluated = Value::Object(BTreeMap::from([(
            "value".to_owned(),
            parent_result.value,
        )]));
        if !eval_condition(&evaluated, &parent.condition, context.global.saved_groups()) {
            log::debug!(target: "growthbook",
                        parent_feature = parent.id.as_str(),
                        gate = parent.gate;
                        "prerequisite condition not met");
            return if parent.gate {
                ParentConditionsOutcome::GateFailed
            } else {
                ParentConditionsOutcome::Failed
            };
        }
    }
    ParentConditionsOutcome::Met
}

/// Returns `true` if the user's hash does not fall into any range of some filter. Users without
/// the filter attribute are filtered out.
pub(super) fn is_filtered_out(context: &EvalContext, filters: &[Filter]) -> bool {
    filters.iter().any(|filter| {
        let hash_value = attribute_string(
            &context.user.attributes,
            filter.attribute.as_deref().unwrap_or("id"),
        );
        if hash_value.is_empty() {
            return true;
        }
        match hash(&filter.seed, &hash_value, filter.hash_version) {
            Some(n) => !filter.ranges.iter().any(|range| range.contains(n)),
            None => true,
        }
    })
}

/// String form of a primitive attribute. Empty if absent or not a primitive.
pub(super) fn attribute_string(attributes: &Value, attribute: &str) -> String {
    attributes
        .get_path(attribute)
        .and_then(Value::to_primitive_string)
        .unwrap_or_default()
}

/// Variation forced by a `?{experiment_key}={index}` query parameter.
fn query_string_override(
    url: Option<&Url>,
    experiment_key: &str,
    num_variations: usize,
) -> Option<usize> {
    let (_, value) = url?
        .query_pairs()
        .find(|(key, _)| key == experiment_key)?;
    let variation: usize = value.parse().ok()?;
    (variation < num_variations).then_some(variation)
}

fn track(context: &EvalContext, experiment: &Experiment, result: &ExperimentResult) {
    let Some(callback) = &context.options.tracking_callback else {
        return;
    };
    if context.options.tracked_experiments.insert(experiment, result) {
        callback.on_experiment_viewed(experiment, result);
    }
}

/// Builds results carrying the experiment's hash attribute and value.
struct ResultBuilder<'e> {
    experiment: &'e Experiment,
    feature_id: Option<&'e str>,
    sticky_bucketing: bool,
    hash_attribute: String,
    hash_value: String,
}

impl<'e> ResultBuilder<'e> {
    fn new(
        context: &EvalContext,
        experiment: &'e Experiment,
        feature_id: Option<&'e str>,
    ) -> ResultBuilder<'e> {
        let sticky_bucketing =
            context.options.sticky_bucket_service.is_some() && !experiment.disable_sticky_bucketing;

        let mut hash_attribute = experiment
            .hash_attribute
            .clone()
            .unwrap_or_else(|| "id".to_owned());
        let mut hash_value = attribute_string(&context.user.attributes, &hash_attribute);

        // The fallback attribute is only meaningful with sticky bucketing: the assignment is
        // carried over once the hash attribute becomes available.
        if hash_value.is_empty() && sticky_bucketing {
            if let Some(fallback) = &experiment.fallback_attribute {
                let fallback_value = attribute_string(&context.user.attributes, fallback);
                if !fallback_value.is_empty() {
                    hash_attribute = fallback.clone();
                    hash_value = fallback_value;
                }
            }
        }

        ResultBuilder {
            experiment,
            feature_id,
            sticky_bucketing,
            hash_attribute,
            hash_value,
        }
    }

    fn not_in_experiment(&self) -> ExperimentResult {
        self.build(None, false, None, false)
    }

    /// Forced variations are not hashed. Out of range indices fall back to not in experiment.
    fn forced(&self, variation: i64) -> ExperimentResult {
        self.build(usize::try_from(variation).ok(), false, None, false)
    }

    fn build(
        &self,
        variation: Option<usize>,
        hash_used: bool,
        bucket: Option<f64>,
        sticky_bucket_used: bool,
    ) -> ExperimentResult {
        let variations = &self.experiment.variations;
        let (variation_id, in_experiment) = match variation {
            Some(index) if index < variations.len() => (index, true),
            _ => (0, false),
        };

        let meta = self.experiment.meta.as_deref();
        let variation_meta = meta.and_then(|meta| meta.get(variation_id));

        ExperimentResult {
            in_experiment,
            variation_id,
            value: variations.get(variation_id).cloned().unwrap_or_default(),
            hash_used,
            hash_attribute: self.hash_attribute.clone(),
            hash_value: self.hash_value.clone(),
            feature_id: self.feature_id.map(ToOwned::to_owned),
            key: variation_key(meta, variation_id),
            name: variation_meta.and_then(|meta| meta.name.clone()),
            bucket,
            passthrough: variation_meta.and_then(|meta| meta.passthrough),
            sticky_bucket_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::{evaluate_experiment, evaluate_experiments};
    use crate::{
        context::{ClientOptions, EvalContext, GlobalContext, UserContext},
        models::Experiment,
        results::ExperimentResult,
        sticky_bucket::{InMemoryStickyBucketService, StickyAssignmentsDocument},
        Value,
    };

    fn experiment(json: serde_json::Value) -> Experiment {
        serde_json::from_value(json).unwrap()
    }

    fn run(
        experiment: &Experiment,
        user: &mut UserContext,
        options: &ClientOptions,
    ) -> ExperimentResult {
        let global = GlobalContext::default();
        let mut context = EvalContext::new(&global, user, options);
        evaluate_experiment(&mut context, experiment)
    }

    fn sticky_options() -> ClientOptions {
        let mut options = ClientOptions::new();
        options.sticky_bucket_service(Arc::new(InMemoryStickyBucketService::new()));
        options
    }

    // hash("exp1", id, 1) for ids "1".."10":
    // 0.39, 0.491, 0.58, 0.681, 0.258, 0.279, 0.672, 0.293, 0.326, 0.494

    #[test]
    fn assigns_by_hash() {
        let _ = env_logger::builder().is_test(true).try_init();

        let exp = Experiment::new("exp1", vec![0.into(), 1.into()]);
        let options = ClientOptions::new();

        let result = run(&exp, &mut UserContext::new(json!({"id": "1"})), &options);
        assert!(result.in_experiment);
        assert!(result.hash_used);
        assert_eq!(result.variation_id, 0);
        assert_eq!(result.value, Value::from(0));
        assert_eq!(result.bucket, Some(0.39));
        assert_eq!(result.key, "0");
        assert_eq!(result.hash_attribute, "id");
        assert_eq!(result.hash_value, "1");
        assert!(!result.sticky_bucket_used);

        let result = run(&exp, &mut UserContext::new(json!({"id": "3"})), &options);
        assert_eq!(result.variation_id, 1);
        assert_eq!(result.bucket, Some(0.58));
        assert_eq!(result.key, "1");
    }

    #[test]
    fn single_variation_is_not_an_experiment() {
        let exp = Experiment::new("exp1", vec![0.into()]);
        let result = run(
            &exp,
            &mut UserContext::new(json!({"id": "1"})),
            &ClientOptions::new(),
        );
        assert!(!result.in_experiment);
        assert_eq!(result.variation_id, 0);
        assert!(!result.hash_used);
    }

    #[test]
    fn disabled_client() {
        let exp = Experiment::new("exp1", vec![0.into(), 1.into()]);
        let mut options = ClientOptions::new();
        options.enabled(false);
        let result = run(&exp, &mut UserContext::new(json!({"id": "3"})), &options);
        assert!(!result.in_experiment);
        assert_eq!(result.value, Value::from(0));
    }

    #[test]
    fn missing_hash_attribute() {
        let exp = Experiment::new("exp1", vec![0.into(), 1.into()]);
        let result = run(&exp, &mut UserContext::new(json!({})), &ClientOptions::new());
        assert!(!result.in_experiment);
        assert_eq!(result.hash_value, "");
    }

    #[test]
    fn custom_hash_attribute() {
        let exp = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "hashAttribute": "company"
        }));
        let result = run(
            &exp,
            &mut UserContext::new(json!({"id": "1", "company": "3"})),
            &ClientOptions::new(),
        );
        assert_eq!(result.hash_attribute, "company");
        assert_eq!(result.hash_value, "3");
        assert_eq!(result.variation_id, 1);
    }

    #[test]
    fn numeric_hash_attribute() {
        let exp = Experiment::new("exp1", vec![0.into(), 1.into()]);
        let result = run(
            &exp,
            &mut UserContext::new(json!({"id": 3})),
            &ClientOptions::new(),
        );
        assert_eq!(result.hash_value, "3");
        assert_eq!(result.bucket, Some(0.58));
    }

    #[test]
    fn forced_variation() {
        let exp = Experiment::new("exp1", vec![0.into(), 1.into()]);
        let mut user = UserContext::new(json!({"id": "1"}));
        user.force_variation("exp1", 1);

        let result = run(&exp, &mut user, &ClientOptions::new());
        assert!(result.in_experiment);
        assert!(!result.hash_used);
        assert_eq!(result.variation_id, 1);
        assert_eq!(result.bucket, None);

        user.force_variation("exp1", 5);
        let result = run(&exp, &mut user, &ClientOptions::new());
        assert!(!result.in_experiment);
        assert_eq!(result.variation_id, 0);

        user.force_variation("exp1", -1);
        let result = run(&exp, &mut user, &ClientOptions::new());
        assert!(!result.in_experiment);
    }

    #[test]
    fn forced_variation_beats_inactive() {
        let mut exp = Experiment::new("exp1", vec![0.into(), 1.into()]);
        exp.is_active = false;
        let mut user = UserContext::new(json!({"id": "1"}));

        assert!(!run(&exp, &mut user, &ClientOptions::new()).in_experiment);

        user.force_variation("exp1", 1);
        let result = run(&exp, &mut user, &ClientOptions::new());
        assert!(result.in_experiment);
        assert_eq!(result.variation_id, 1);
    }

    #[test]
    fn query_string_override() {
        let exp = Experiment::new("exp1", vec![0.into(), 1.into(), 2.into()]);
        let mut options = ClientOptions::new();
        options.url("https://example.com/?foo=bar&exp1=2").unwrap();

        let result = run(&exp, &mut UserContext::new(json!({"id": "1"})), &options);
        assert!(result.in_experiment);
        assert!(!result.hash_used);
        assert_eq!(result.variation_id, 2);

        // out of range and malformed values are ignored
        for url in ["https://example.com/?exp1=3", "https://example.com/?exp1=abc"] {
            options.url(url).unwrap();
            let result = run(&exp, &mut UserContext::new(json!({"id": "1"})), &options);
            assert!(result.hash_used);
            assert_eq!(result.variation_id, 1);
        }
    }

    #[test]
    fn experiment_force() {
        let exp = experiment(json!({"key": "exp1", "variations": [0, 1], "force": 1}));
        let result = run(
            &exp,
            &mut UserContext::new(json!({"id": "1"})),
            &ClientOptions::new(),
        );
        assert!(result.in_experiment);
        assert!(!result.hash_used);
        assert_eq!(result.variation_id, 1);

        // force only applies to included users
        let exp = experiment(json!({"key": "exp1", "variations": [0, 1], "force": 1, "coverage": 0.01}));
        let result = run(
            &exp,
            &mut UserContext::new(json!({"id": "1"})),
            &ClientOptions::new(),
        );
        assert!(!result.in_experiment);
    }

    #[test]
    fn coverage() {
        // with coverage 0.4, ranges are [0, 0.2) and [0.5, 0.7)
        let exp = experiment(json!({"key": "exp1", "variations": [0, 1], "coverage": 0.4}));
        let options = ClientOptions::new();

        // 0.39
        assert!(!run(&exp, &mut UserContext::new(json!({"id": "1"})), &options).in_experiment);
        // 0.58
        let result = run(&exp, &mut UserContext::new(json!({"id": "3"})), &options);
        assert!(result.in_experiment);
        assert_eq!(result.variation_id, 1);
        // 0.681
        assert!(run(&exp, &mut UserContext::new(json!({"id": "4"})), &options).in_experiment);
        // 0.491
        assert!(!run(&exp, &mut UserContext::new(json!({"id": "2"})), &options).in_experiment);
    }

    #[test]
    fn explicit_ranges() {
        let exp = experiment(json!({
            "key": "exp1",
            "variations": ["a", "b"],
            "ranges": [[0.0, 0.3], [0.3, 0.5]],
            "weights": [0.9, 0.1]
        }));
        let options = ClientOptions::new();
        // 0.258
        assert_eq!(
            run(&exp, &mut UserContext::new(json!({"id": "5"})), &options).value,
            Value::from("a")
        );
        // 0.39
        assert_eq!(
            run(&exp, &mut UserContext::new(json!({"id": "1"})), &options).value,
            Value::from("b")
        );
        // 0.58
        assert!(!run(&exp, &mut UserContext::new(json!({"id": "3"})), &options).in_experiment);
    }

    #[test]
    fn inactive_experiment() {
        let exp = experiment(json!({"key": "exp1", "variations": [0, 1], "active": false}));
        let result = run(
            &exp,
            &mut UserContext::new(json!({"id": "1"})),
            &ClientOptions::new(),
        );
        assert!(!result.in_experiment);
    }

    #[test]
    fn condition() {
        let exp = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "condition": {"country": {"$in": ["US", "CA"]}}
        }));
        let options = ClientOptions::new();
        assert!(
            run(&exp, &mut UserContext::new(json!({"id": "1", "country": "US"})), &options)
                .in_experiment
        );
        assert!(
            !run(&exp, &mut UserContext::new(json!({"id": "1", "country": "UK"})), &options)
                .in_experiment
        );
    }

    #[test]
    fn namespace() {
        // hash("__ns1", "1", 1) == 0.852, hash("__ns1", "2", 1) == 0.399
        let exp = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "namespace": ["ns1", 0.5, 1.0]
        }));
        let options = ClientOptions::new();
        assert!(run(&exp, &mut UserContext::new(json!({"id": "1"})), &options).in_experiment);
        assert!(!run(&exp, &mut UserContext::new(json!({"id": "2"})), &options).in_experiment);
    }

    #[test]
    fn filters_supersede_namespace() {
        // hash("seed", "a", 2) == 0.0505, hash("seed", "b", 2) == 0.2696
        let exp = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "namespace": ["ns1", 0.0, 0.0],
            "filters": [{"seed": "seed", "ranges": [[0.0, 0.1]]}]
        }));
        let options = ClientOptions::new();
        assert!(run(&exp, &mut UserContext::new(json!({"id": "a"})), &options).in_experiment);
        assert!(!run(&exp, &mut UserContext::new(json!({"id": "b"})), &options).in_experiment);
    }

    #[test]
    fn unknown_hash_version() {
        let exp = experiment(json!({"key": "exp1", "variations": [0, 1], "hashVersion": 99}));
        let result = run(
            &exp,
            &mut UserContext::new(json!({"id": "1"})),
            &ClientOptions::new(),
        );
        assert!(!result.in_experiment);
    }

    #[test]
    fn qa_mode() {
        let exp = Experiment::new("exp1", vec![0.into(), 1.into()]);
        let mut options = ClientOptions::new();
        options.qa_mode(true);

        let mut user = UserContext::new(json!({"id": "1"}));
        assert!(!run(&exp, &mut user, &options).in_experiment);

        user.force_variation("exp1", 1);
        assert!(run(&exp, &mut user, &options).in_experiment);
    }

    #[test]
    fn variation_meta() {
        let exp = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "meta": [{"key": "control", "name": "Control"}, {"key": "treatment", "passthrough": true}]
        }));
        let options = ClientOptions::new();

        let result = run(&exp, &mut UserContext::new(json!({"id": "1"})), &options);
        assert_eq!(result.key, "control");
        assert_eq!(result.name.as_deref(), Some("Control"));
        assert_eq!(result.passthrough, None);

        let result = run(&exp, &mut UserContext::new(json!({"id": "3"})), &options);
        assert_eq!(result.key, "treatment");
        assert_eq!(result.name, None);
        assert_eq!(result.passthrough, Some(true));
    }

    #[test]
    fn tracks_once_per_assignment() {
        let exp = Experiment::new("exp1", vec![0.into(), 1.into()]);
        let tracked = Arc::new(Mutex::new(Vec::new()));

        let mut options = ClientOptions::new();
        {
            let tracked = tracked.clone();
            options.tracking_callback(move |experiment: &Experiment, result: &ExperimentResult| {
                tracked
                    .lock()
                    .unwrap()
                    .push((experiment.key.clone(), result.variation_id));
            });
        }

        for id in ["1", "1", "3", "1", "3"] {
            run(&exp, &mut UserContext::new(json!({"id": id})), &options);
        }
        assert_eq!(
            *tracked.lock().unwrap(),
            vec![("exp1".to_owned(), 0), ("exp1".to_owned(), 1)]
        );

        // users not in the experiment are not tracked
        run(&exp, &mut UserContext::new(json!({})), &options);
        assert_eq!(tracked.lock().unwrap().len(), 2);
    }

    #[test]
    fn sticky_bucket_survives_targeting_changes() {
        let options = sticky_options();
        let mut user = UserContext::new(json!({"id": "1", "country": "US"}));

        let exp = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "meta": [{"key": "control"}, {"key": "treatment"}]
        }));
        let first = run(&exp, &mut user, &options);
        assert!(first.in_experiment);
        assert_eq!(first.key, "control");
        assert!(!first.sticky_bucket_used);
        assert_eq!(
            user.sticky_bucket_assignment_docs["id||1"].assignments["exp1__0"],
            "control"
        );

        // new weights would move the user to treatment, a condition would exclude them
        let changed = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "weights": [0.1, 0.9],
            "coverage": 0.5,
            "condition": {"country": "CA"},
            "meta": [{"key": "control"}, {"key": "treatment"}]
        }));
        let second = run(&changed, &mut user, &options);
        assert!(second.in_experiment);
        assert_eq!(second.variation_id, first.variation_id);
        assert!(second.sticky_bucket_used);

        // without sticky bucketing the condition applies
        let mut fresh_user = UserContext::new(json!({"id": "1", "country": "US"}));
        assert!(!run(&changed, &mut fresh_user, &ClientOptions::new()).in_experiment);
    }

    #[test]
    fn sticky_bucket_disabled_per_experiment() {
        let options = sticky_options();
        let mut user = UserContext::new(json!({"id": "1"}));
        let exp = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "disableStickyBucketing": true
        }));
        assert!(run(&exp, &mut user, &options).in_experiment);
        assert!(user.sticky_bucket_assignment_docs.is_empty());
    }

    #[test]
    fn sticky_bucket_version_bump_rebuckets() {
        let options = sticky_options();
        let mut user = UserContext::new(json!({"id": "1"}));
        user.sticky_bucket_assignment_docs([StickyAssignmentsDocument {
            attribute_name: "id".into(),
            attribute_value: "1".into(),
            assignments: [("exp1__0".to_owned(), "1".to_owned())].into(),
        }]);

        let v0 = experiment(json!({"key": "exp1", "variations": [0, 1]}));
        let result = run(&v0, &mut user, &options);
        assert_eq!(result.variation_id, 1);
        assert!(result.sticky_bucket_used);

        let v1 = experiment(json!({"key": "exp1", "variations": [0, 1], "bucketVersion": 1}));
        let result = run(&v1, &mut user, &options);
        assert_eq!(result.variation_id, 0);
        assert!(!result.sticky_bucket_used);
        assert_eq!(
            user.sticky_bucket_assignment_docs["id||1"].assignments["exp1__1"],
            "0"
        );
        // the old assignment is kept
        assert_eq!(
            user.sticky_bucket_assignment_docs["id||1"].assignments["exp1__0"],
            "1"
        );
    }

    #[test]
    fn sticky_bucket_min_version_blocks() {
        let options = sticky_options();
        let mut user = UserContext::new(json!({"id": "1"}));
        user.sticky_bucket_assignment_docs([StickyAssignmentsDocument {
            attribute_name: "id".into(),
            attribute_value: "1".into(),
            assignments: [("exp1__0".to_owned(), "0".to_owned())].into(),
        }]);

        let exp = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "bucketVersion": 1,
            "minBucketVersion": 1
        }));
        let result = run(&exp, &mut user, &options);
        assert!(!result.in_experiment);
        assert!(result.sticky_bucket_used);

        let mut new_user = UserContext::new(json!({"id": "1"}));
        assert!(run(&exp, &mut new_user, &options).in_experiment);
    }

    #[test]
    fn sticky_bucket_fallback_attribute() {
        let options = sticky_options();
        let exp = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "hashAttribute": "id",
            "fallbackAttribute": "deviceId"
        }));

        // anonymous user is bucketed by device
        let mut user = UserContext::new(json!({"deviceId": "3"}));
        let anonymous = run(&exp, &mut user, &options);
        assert!(anonymous.in_experiment);
        assert_eq!(anonymous.hash_attribute, "deviceId");
        assert_eq!(anonymous.variation_id, 1);

        // after login, the device assignment is kept and copied to the id document
        user.attributes = json!({"id": "1", "deviceId": "3"}).into();
        let logged_in = run(&exp, &mut user, &options);
        assert_eq!(logged_in.hash_attribute, "id");
        assert_eq!(logged_in.variation_id, 1);
        assert!(logged_in.sticky_bucket_used);
        assert_eq!(
            user.sticky_bucket_assignment_docs["id||1"].assignments["exp1__0"],
            "1"
        );

        // without sticky bucketing, the fallback attribute is not used
        let mut user = UserContext::new(json!({"deviceId": "3"}));
        assert!(!run(&exp, &mut user, &ClientOptions::new()).in_experiment);
    }

    #[test]
    fn sticky_bucket_updates_are_queued() {
        let options = sticky_options();
        let global = GlobalContext::default();
        let mut user = UserContext::new(json!({"id": "1"}));
        let mut context = EvalContext::new(&global, &mut user, &options);

        let exp = Experiment::new("exp1", vec![0.into(), 1.into()]);
        evaluate_experiment(&mut context, &exp);
        let updates = context.take_sticky_bucket_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].key(), "id||1");

        // unchanged assignment is not queued again
        evaluate_experiment(&mut context, &exp);
        assert!(context.take_sticky_bucket_updates().is_empty());
    }

    #[test]
    fn evaluates_all_experiments() {
        let global = GlobalContext::from_json(
            r#"{"experiments": [
                {"key": "exp1", "variations": [0, 1]},
                {"key": "broken", "variations": 5},
                {"key": "exp2", "variations": ["a"]}
            ]}"#,
        )
        .unwrap();
        let mut user = UserContext::new(json!({"id": "3"}));
        let options = ClientOptions::new();
        let mut context = EvalContext::new(&global, &mut user, &options);

        let results = evaluate_experiments(&mut context);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "exp1");
        assert_eq!(results[0].1.variation_id, 1);
        assert_eq!(results[1].0, "exp2");
        assert!(!results[1].1.in_experiment);
    }

    #[test]
    fn experiment_prerequisites() {
        let global = GlobalContext::from_json(
            r#"{"features": {"parent": {"defaultValue": true}}}"#,
        )
        .unwrap();
        let options = ClientOptions::new();

        let pass = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "parentConditions": [{"id": "parent", "condition": {"value": true}}]
        }));
        let fail = experiment(json!({
            "key": "exp1",
            "variations": [0, 1],
            "parentConditions": [{"id": "parent", "condition": {"value": false}}]
        }));

        let mut user = UserContext::new(json!({"id": "1"}));
        let mut context = EvalContext::new(&global, &mut user, &options);
        assert!(evaluate_experiment(&mut context, &pass).in_experiment);
        assert!(!evaluate_experiment(&mut context, &fail).in_experiment);
    }
}
