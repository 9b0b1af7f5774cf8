//! Experiment store boundary.
//!
//! Projects own experiments; experiments own an append-only, insertion-ordered
//! result sequence. The per-project baseline pointer is the only state that is
//! ever overwritten, and it is changed in a single store-level step.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryExperimentStore;
pub use postgres::PostgresExperimentStore;

use async_trait::async_trait;
use thiserror::Error;

use evalhub_catalog::{AppendOutcome, EvalResult, Experiment, NewExperiment};
use evalhub_core::{DomainError, ExperimentName, ProjectName};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid data: {0}")]
    Invalid(String),

    /// Backend unreachable or failing; callers may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<DomainError> for StoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound(what) => StoreError::NotFound(what),
            DomainError::Conflict(msg) => StoreError::AlreadyExists(msg),
            other => StoreError::Invalid(other.to_string()),
        }
    }
}

#[async_trait]
pub trait ExperimentStore: Send + Sync {
    /// Experiments of a project in creation order; empty for an unknown project.
    async fn list_experiments(&self, project: &ProjectName) -> Result<Vec<Experiment>, StoreError>;

    /// Create an experiment, creating the project if needed.
    async fn add_experiment(
        &self,
        project: &ProjectName,
        experiment: NewExperiment,
    ) -> Result<Experiment, StoreError>;

    /// Make `experiment` the project baseline, clearing the previous one.
    async fn set_baseline(
        &self,
        project: &ProjectName,
        experiment: &ExperimentName,
    ) -> Result<(), StoreError>;

    /// Append a result, creating project and experiment on first write.
    async fn append_result(
        &self,
        project: &ProjectName,
        experiment: &ExperimentName,
        result: EvalResult,
    ) -> Result<AppendOutcome, StoreError>;

    async fn get_baseline(&self, project: &ProjectName) -> Result<Option<Experiment>, StoreError>;

    async fn get_experiment(
        &self,
        project: &ProjectName,
        experiment: &ExperimentName,
    ) -> Result<Option<Experiment>, StoreError>;
}
