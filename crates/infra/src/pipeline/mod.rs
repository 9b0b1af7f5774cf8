//! Evaluation pipeline boundary.
//!
//! The pipeline is the external routine that compares a ground-truth artifact
//! with an inference artifact and writes an evaluation artifact. This crate
//! only decides when it runs and what happens to its score.

pub mod http;

pub use http::HttpEvaluationPipeline;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Artifact locators for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub ground_truth_uri: String,
    pub inference_uri: String,
    pub evaluation_uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Worth another delivery (timeouts, throttling, unavailable backends).
    #[error("transient pipeline failure: {0}")]
    Transient(String),

    /// Retrying the same inputs cannot succeed.
    #[error("permanent pipeline failure: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait EvaluationPipeline: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, PipelineError>;
}
