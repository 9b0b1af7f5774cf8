//! `evalhub-core`: foundation building blocks shared by every crate.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! identifiers, validated names, the domain error model and the statistics
//! helpers used for result aggregation.

pub mod error;
pub mod id;
pub mod name;
pub mod stats;
pub mod value_object;

pub use error::{DomainError, DomainResult};
pub use id::{ResultId, RunId};
pub use name::{ExperimentName, ProjectName, SetName};
pub use stats::{mean, std_dev};
pub use value_object::ValueObject;
