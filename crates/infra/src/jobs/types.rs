//! Wire types for the evaluation job queue.

use serde::{Deserialize, Serialize};

use evalhub_core::{DomainError, ExperimentName, ProjectName, RunId, SetName};

/// Client request to evaluate every item of a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub set: SetName,

    #[serde(default)]
    pub is_baseline: bool,

    /// Overrides the project the set definition points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectName>,

    /// Overrides the experiment the set definition points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentName>,
}

impl EnqueueRequest {
    pub fn new(set: SetName, is_baseline: bool) -> Self {
        Self {
            set,
            is_baseline,
            project: None,
            experiment: None,
        }
    }
}

/// Per-job partition of an enqueue call. Ids are the job refs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub successful: Vec<String>,
    pub failed: Vec<String>,
}

impl EnqueueResponse {
    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

/// One message on the queue: a single ground-truth/inference comparison.
///
/// Names are carried as plain strings so that a message with a bad name still
/// deserializes and can be dead-lettered with a precise reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub ground_truth_uri: String,
    pub inference_uri: String,
    pub evaluation_uri: String,
    pub project: String,
    pub experiment: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub set: String,
    #[serde(default)]
    pub is_baseline: bool,
    /// Enqueue call this job was fanned out from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
}

/// A `PipelineJob` whose names passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedJob {
    pub project: ProjectName,
    pub experiment: ExperimentName,
    pub set: SetName,
    pub job: PipelineJob,
}

impl PipelineJob {
    /// Check names and required fields.
    pub fn validate(self) -> Result<ValidatedJob, DomainError> {
        for (field, value) in [
            ("ground_truth_uri", &self.ground_truth_uri),
            ("inference_uri", &self.inference_uri),
            ("evaluation_uri", &self.evaluation_uri),
            ("ref", &self.reference),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::validation(format!("{field} must not be empty")));
            }
        }

        Ok(ValidatedJob {
            project: ProjectName::new(self.project.clone())?,
            experiment: ExperimentName::new(self.experiment.clone())?,
            set: SetName::new(self.set.clone())?,
            job: self,
        })
    }
}
