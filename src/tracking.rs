//! Experiment exposure tracking.
use std::collections::HashSet;
use std::sync::Mutex;

use crate::{models::Experiment, results::ExperimentResult};

/// Callback receiving experiment exposures, e.g., to forward them to an analytics pipeline.
///
/// Invoked at most once per (hash attribute, hash value, experiment key, variation) for the
/// lifetime of the [`TrackedExperiments`] set it is configured with.
pub trait TrackingCallback: Send + Sync {
    #[allow(missing_docs)]
    fn on_experiment_viewed(&self, experiment: &Experiment, result: &ExperimentResult);
}

impl<T: Fn(&Experiment, &ExperimentResult) + Send + Sync> TrackingCallback for T {
    fn on_experiment_viewed(&self, experiment: &Experiment, result: &ExperimentResult) {
        self(experiment, result);
    }
}

type TrackingKey = (String, String, String, usize);

/// Set of already tracked exposures.
///
/// A single set is normally shared by all evaluations of a process. Tests that need isolation
/// should create a fresh one.
#[derive(Debug, Default)]
pub struct TrackedExperiments {
    seen: Mutex<HashSet<TrackingKey>>,
}

impl TrackedExperiments {
    #[allow(missing_docs)]
    pub fn new() -> TrackedExperiments {
        TrackedExperiments::default()
    }

    /// Record the exposure. Returns `false` if it was recorded before.
    pub(crate) fn insert(&self, experiment: &Experiment, result: &ExperimentResult) -> bool {
        let key = (
            result.hash_attribute.clone(),
            result.hash_value.clone(),
            experiment.key.clone(),
            result.variation_id,
        );
        self.seen
            .lock()
            .expect("thread holding tracking lock should not panic")
            .insert(key)
    }

    /// Number of distinct exposures recorded.
    pub fn len(&self) -> usize {
        self.seen
            .lock()
            .expect("thread holding tracking lock should not panic")
            .len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all recorded exposures.
    pub fn clear(&self) {
        self.seen
            .lock()
            .expect("thread holding tracking lock should not panic")
            .clear();
    }
}
