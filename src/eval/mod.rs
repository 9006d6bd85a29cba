//! Evaluation functions.
//!
//! [`evaluate_feature`] resolves a feature through its rules, running inline experiments with
//! the same logic as [`evaluate_experiment`]. Both are pure functions of the context (apart from
//! sticky bucket documents and exposure tracking), and never fail.
mod evaluator;
mod experiment;
mod feature;

pub use evaluator::{Evaluator, EvaluatorConfig};
pub use experiment::{evaluate_experiment, evaluate_experiments};
pub use feature::evaluate_feature;
