//! Experiment catalog domain (projects, experiments, results).
//!
//! This crate contains the catalog rules implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage): the single-baseline invariant,
//! append-only result sets with per-job dedupe, and set aggregation for
//! baseline comparison.

pub mod comparison;
pub mod experiment;
pub mod project;
pub mod summary;

pub use comparison::Comparison;
pub use experiment::{EvalResult, Experiment, NewExperiment, ResultKey};
pub use project::{AppendOutcome, Project};
pub use summary::{SetSummary, Summary};
