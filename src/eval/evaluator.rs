use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    configuration_store::ConfigurationStore,
    context::{ClientOptions, EvalContext, GlobalContext, UserContext},
    models::{Experiment, TryParse},
    results::{ExperimentResult, FeatureResult},
    sticky_bucket::StickyAssignmentsDocument,
    Result, Value,
};

use super::{evaluate_experiment, evaluate_experiments, evaluate_feature};

/// Configuration for [`Evaluator`].
pub struct EvaluatorConfig {
    /// Source of feature definitions. Replaced snapshots are picked up on the next evaluation.
    pub configuration_store: Arc<ConfigurationStore>,
    #[allow(missing_docs)]
    pub options: ClientOptions,
}

/// Evaluator simplifies calling into evaluation functions: it picks up the current definitions
/// from the store and persists sticky bucket changes through the configured
/// [`StickyBucketService`](crate::sticky_bucket::StickyBucketService).
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    #[allow(missing_docs)]
    pub fn new(config: EvaluatorConfig) -> Evaluator {
        Evaluator { config }
    }

    /// See [`evaluate_feature`](crate::eval::evaluate_feature).
    pub fn evaluate_feature(&self, user: &mut UserContext, feature_key: &str) -> FeatureResult {
        self.with_context(user, |context| evaluate_feature(context, feature_key))
    }

    /// Shorthand for `evaluate_feature(user, feature_key).is_on()`.
    pub fn is_on(&self, user: &mut UserContext, feature_key: &str) -> bool {
        self.evaluate_feature(user, feature_key).is_on()
    }

    /// Feature value, or `default` if the feature evaluates to null.
    pub fn get_feature_value(
        &self,
        user: &mut UserContext,
        feature_key: &str,
        default: Value,
    ) -> Value {
        match self.evaluate_feature(user, feature_key).value {
            Value::Null => default,
            value => value,
        }
    }

    /// See [`evaluate_experiment`](crate::eval::evaluate_experiment).
    pub fn evaluate_experiment(
        &self,
        user: &mut UserContext,
        experiment: &Experiment,
    ) -> ExperimentResult {
        self.with_context(user, |context| evaluate_experiment(context, experiment))
    }

    #[allow(missing_docs)]
    pub fn evaluate_experiments(&self, user: &mut UserContext) -> Vec<(String, ExperimentResult)> {
        self.with_context(user, evaluate_experiments)
    }

    /// Load sticky bucket documents for all attributes used by current definitions into `user`.
    ///
    /// Does nothing if no sticky bucket service is configured.
    pub fn refresh_sticky_buckets(&self, user: &mut UserContext) -> Result<()> {
        let Some(service) = &self.config.options.sticky_bucket_service else {
            return Ok(());
        };

        let global = self.get_global_context();
        let attributes = sticky_bucket_attributes(&global)
            .into_iter()
            .filter_map(|attribute| {
                let value = user.attributes.get_path(&attribute)?.to_primitive_string()?;
                Some((attribute, value))
            })
            .collect::<HashMap<_, _>>();

        let docs = service.get_all_assignments(&attributes)?;
        user.sticky_bucket_assignment_docs.extend(docs);
        Ok(())
    }

    fn with_context<T>(
        &self,
        user: &mut UserContext,
        f: impl FnOnce(&mut EvalContext) -> T,
    ) -> T {
        let global = self.get_global_context();
        let mut context = EvalContext::new(&global, user, &self.config.options);
        let result = f(&mut context);
        let updates = context.take_sticky_bucket_updates();
        self.save_sticky_buckets(&updates);
        result
    }

    fn save_sticky_buckets(&self, docs: &[StickyAssignmentsDocument]) {
        let Some(service) = &self.config.options.sticky_bucket_service else {
            return;
        };
        for doc in docs {
            if let Err(err) = service.save_assignments(doc) {
                log::warn!(target: "growthbook",
                           attribute_name = doc.attribute_name.as_str(),
                           attribute_value = doc.attribute_value.as_str();
                           "failed to save sticky bucket assignments: {err}");
            }
        }
    }

    fn get_global_context(&self) -> Arc<GlobalContext> {
        match self.config.configuration_store.get_global_context() {
            Some(global) => global,
            None => {
                log::warn!(target: "growthbook", "evaluating before feature definitions have been loaded");
                Arc::new(GlobalContext::default())
            }
        }
    }
}

/// Hash and fallback attributes of all experiments that may use sticky bucketing.
fn sticky_bucket_attributes(global: &GlobalContext) -> Vec<String> {
    let mut attributes = Vec::new();
    let mut add = |hash_attribute: Option<&String>, fallback_attribute: Option<&String>| {
        attributes.push(
            hash_attribute
                .cloned()
                .unwrap_or_else(|| "id".to_owned()),
        );
        attributes.extend(fallback_attribute.cloned());
    };

    for feature in global.features.values() {
        let TryParse::Parsed(feature) = feature else {
            continue;
        };
        for rule in &feature.rules {
            if rule.variations.is_some() && !rule.disable_sticky_bucketing {
                add(rule.hash_attribute.as_ref(), rule.fallback_attribute.as_ref());
            }
        }
    }
    for experiment in &global.experiments {
        if let TryParse::Parsed(experiment) = experiment {
            if !experiment.disable_sticky_bucketing {
                add(
                    experiment.hash_attribute.as_ref(),
                    experiment.fallback_attribute.as_ref(),
                );
            }
        }
    }

    attributes.sort();
    attributes.dedup();
    attributes
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::{Evaluator, EvaluatorConfig};
    use crate::{
        configuration_store::ConfigurationStore,
        context::{ClientOptions, GlobalContext, UserContext},
        models::Experiment,
        results::{ExperimentResult, FeatureSource},
        sticky_bucket::{InMemoryStickyBucketService, StickyBucketService},
        Value,
    };

    fn store(json: serde_json::Value) -> Arc<ConfigurationStore> {
        let store = Arc::new(ConfigurationStore::new());
        store.set_global_context(Arc::new(
            GlobalContext::from_json(&json.to_string()).unwrap(),
        ));
        store
    }

    #[test]
    fn evaluates_without_definitions() {
        let _ = env_logger::builder().is_test(true).try_init();

        let evaluator = Evaluator::new(EvaluatorConfig {
            configuration_store: Arc::new(ConfigurationStore::new()),
            options: ClientOptions::new(),
        });
        let mut user = UserContext::new(json!({"id": "1"}));

        let result = evaluator.evaluate_feature(&mut user, "feature");
        assert_eq!(result.source, FeatureSource::UnknownFeature);
        assert_eq!(
            evaluator.get_feature_value(&mut user, "feature", Value::from("fallback")),
            Value::from("fallback")
        );
    }

    #[test]
    fn picks_up_new_definitions() {
        let configuration_store = store(json!({"features": {"feature": {"defaultValue": false}}}));
        let evaluator = Evaluator::new(EvaluatorConfig {
            configuration_store: configuration_store.clone(),
            options: ClientOptions::new(),
        });
        let mut user = UserContext::new(json!({"id": "1"}));
        assert!(!evaluator.is_on(&mut user, "feature"));

        configuration_store.set_global_context(Arc::new(
            GlobalContext::from_json(r#"{"features": {"feature": {"defaultValue": true}}}"#)
                .unwrap(),
        ));
        assert!(evaluator.is_on(&mut user, "feature"));
    }

    #[test]
    fn persists_and_restores_sticky_buckets() {
        let service = Arc::new(InMemoryStickyBucketService::new());
        let mut options = ClientOptions::new();
        options.sticky_bucket_service(service.clone());

        // hash("exp1", "1", 1) == 0.39
        let configuration_store = store(json!({
            "features": {
                "feature": {
                    "defaultValue": "default",
                    "rules": [{"key": "exp1", "variations": ["a", "b"], "fallbackAttribute": "deviceId"}]
                }
            }
        }));
        let evaluator = Evaluator::new(EvaluatorConfig {
            configuration_store: configuration_store.clone(),
            options,
        });

        let mut user = UserContext::new(json!({"id": "1"}));
        assert_eq!(
            evaluator.evaluate_feature(&mut user, "feature").value,
            Value::from("a")
        );
        let saved = service.get_assignments("id", "1").unwrap().unwrap();
        assert_eq!(saved.assignments["exp1__0"], "0");

        // a new session restores the assignment even though the split changed
        configuration_store.set_global_context(Arc::new(
            GlobalContext::from_json(
                &json!({
                    "features": {
                        "feature": {
                            "defaultValue": "default",
                            "rules": [{"key": "exp1", "variations": ["a", "b"], "weights": [0.01, 0.99]}]
                        }
                    }
                })
                .to_string(),
            )
            .unwrap(),
        ));
        let mut new_session = UserContext::new(json!({"id": "1"}));
        evaluator.refresh_sticky_buckets(&mut new_session).unwrap();
        assert!(new_session.sticky_bucket_assignment_docs.contains_key("id||1"));

        let result = evaluator.evaluate_feature(&mut new_session, "feature");
        assert_eq!(result.value, Value::from("a"));
        assert!(result.experiment_result.unwrap().sticky_bucket_used);
    }

    #[test]
    fn refresh_without_service_is_noop() {
        let evaluator = Evaluator::new(EvaluatorConfig {
            configuration_store: store(json!({"experiments": [{"key": "exp1", "variations": [0, 1]}]})),
            options: ClientOptions::new(),
        });
        let mut user = UserContext::new(json!({"id": "1"}));
        evaluator.refresh_sticky_buckets(&mut user).unwrap();
        assert!(user.sticky_bucket_assignment_docs.is_empty());
    }

    #[test]
    fn sticky_bucket_attributes_cover_definitions() {
        let global = GlobalContext::from_json(
            &json!({
                "features": {
                    "f1": {"rules": [
                        {"variations": [0, 1], "hashAttribute": "company", "fallbackAttribute": "deviceId"},
                        {"force": 1, "hashAttribute": "ignored"},
                        {"variations": [0, 1], "hashAttribute": "disabled", "disableStickyBucketing": true}
                    ]}
                },
                "experiments": [{"key": "exp1", "variations": [0, 1]}]
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(
            super::sticky_bucket_attributes(&global),
            vec!["company".to_owned(), "deviceId".to_owned(), "id".to_owned()]
        );
    }

    #[test]
    fn evaluates_experiments_and_tracks() {
        let tracked = Arc::new(Mutex::new(Vec::new()));
        let mut options = ClientOptions::new();
        {
            let tracked = tracked.clone();
            options.tracking_callback(move |experiment: &Experiment, result: &ExperimentResult| {
                tracked
                    .lock()
                    .unwrap()
                    .push((experiment.key.clone(), result.key.clone()));
            });
        }
        let evaluator = Evaluator::new(EvaluatorConfig {
            configuration_store: store(json!({"experiments": [{"key": "exp1", "variations": [0, 1]}]})),
            options,
        });

        // hash("exp1", "3", 1) == 0.58
        let mut user = UserContext::new(json!({"id": "3"}));
        let results = evaluator.evaluate_experiments(&mut user);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.variation_id, 1);

        let result = evaluator.evaluate_experiment(
            &mut user,
            &Experiment::new("exp1", vec![0.into(), 1.into()]),
        );
        assert_eq!(result.variation_id, 1);

        assert_eq!(
            *tracked.lock().unwrap(),
            vec![("exp1".to_owned(), "1".to_owned())]
        );
    }
}
