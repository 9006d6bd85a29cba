//! Core evaluation engine for feature flags and A/B experiments.
//!
//! # Overview
//!
//! Given feature definitions ([`GlobalContext`]), a user ([`UserContext`]), and client options
//! ([`ClientOptions`]), the engine deterministically decides which value a feature resolves to
//! ([`eval::evaluate_feature`]) and which experiment variation a user falls into
//! ([`eval::evaluate_experiment`]). Decisions are identical to other implementations of the same
//! hashing and bucketing algorithms, so a user sees the same variation on every platform.
//!
//! The building blocks are exposed as modules:
//! - [`hashing`]: seeded hashing, bucket ranges, namespaces, and version strings.
//! - [`condition`]: targeting conditions.
//! - [`sticky_bucket`]: persisting assignments across targeting changes.
//! - [`eval`]: feature and experiment evaluation, and the [`eval::Evaluator`] helper.
//! - [`configuration_store`]: thread-safe storage of the current definitions.
//!
//! # Error Handling
//!
//! Evaluation never fails: malformed definitions and missing attributes degrade to default values
//! and are logged. [`Error`] is only returned by collaborators: decoding definitions, parsing
//! client options, and sticky bucket storage.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with the `growthbook` target.
//! Consider integrating a `log`-compatible logger implementation for better visibility into
//! evaluation.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod condition;
pub mod configuration_store;
pub mod eval;
pub mod hashing;
pub mod sticky_bucket;

mod context;
mod error;
mod models;
mod results;
mod tracking;
mod value;

pub use context::{ClientOptions, EvalContext, GlobalContext, StackContext, UserContext};
pub use error::{Error, Result};
pub use models::{
    BucketRange, Experiment, Feature, FeatureRule, Filter, Namespace, ParentCondition, TryParse,
    VariationMeta,
};
pub use results::{ExperimentResult, FeatureResult, FeatureSource};
pub use tracking::{TrackedExperiments, TrackingCallback};
pub use value::Value;
