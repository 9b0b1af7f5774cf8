//! Fan-out of one enqueue request into per-item queue messages.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use evalhub_core::RunId;

use super::resolver::{ResolutionError, SetItem, SetResolver};
use super::types::{EnqueueRequest, EnqueueResponse, PipelineJob};
use crate::queue::JobQueue;

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

/// Locator layout for artifacts produced by a run.
#[derive(Debug, Clone)]
pub struct EnqueuerConfig {
    pub inference_prefix: String,
    pub evaluation_prefix: String,
}

impl Default for EnqueuerConfig {
    fn default() -> Self {
        Self {
            inference_prefix: "inference".to_string(),
            evaluation_prefix: "evaluation".to_string(),
        }
    }
}

fn locator(prefix: &str, run_id: RunId, reference: &str) -> String {
    format!("{}/{run_id}/{reference}.json", prefix.trim_end_matches('/'))
}

pub struct Enqueuer {
    resolver: Arc<dyn SetResolver>,
    queue: Arc<dyn JobQueue>,
    config: EnqueuerConfig,
}

impl Enqueuer {
    pub fn new(resolver: Arc<dyn SetResolver>, queue: Arc<dyn JobQueue>, config: EnqueuerConfig) -> Self {
        Self {
            resolver,
            queue,
            config,
        }
    }

    /// Resolve the set and write one message per item.
    ///
    /// An unknown or empty set yields an empty response. A set with empty or
    /// repeated refs is rejected before anything is written. A failure to
    /// write a single item lands its ref in `failed` and the rest continue.
    #[instrument(skip(self, request), fields(set = %request.set, is_baseline = request.is_baseline), err)]
    pub async fn enqueue(&self, request: &EnqueueRequest) -> Result<EnqueueResponse, EnqueueError> {
        let mut response = EnqueueResponse::default();

        let Some(resolved) = self.resolver.resolve(&request.set).await? else {
            info!("set is unknown, nothing to enqueue");
            return Ok(response);
        };
        resolved.check(&request.set)?;

        let project = request.project.as_ref().unwrap_or(&resolved.project);
        let experiment = request.experiment.as_ref().unwrap_or(&resolved.experiment);
        let run_id = RunId::new();

        for item in &resolved.items {
            let job = self.build_job(request, project.as_str(), experiment.as_str(), run_id, item);

            let body = match serde_json::to_string(&job) {
                Ok(body) => body,
                Err(e) => {
                    warn!(job_ref = %item.reference, error = %e, "failed to serialize job");
                    response.failed.push(item.reference.clone());
                    continue;
                }
            };

            match self.queue.enqueue(body).await {
                Ok(message_id) => {
                    debug!(job_ref = %item.reference, %message_id, "job enqueued");
                    response.successful.push(item.reference.clone());
                }
                Err(e) => {
                    warn!(job_ref = %item.reference, error = %e, "failed to enqueue job");
                    response.failed.push(item.reference.clone());
                }
            }
        }

        info!(
            %run_id,
            %project,
            %experiment,
            successful = response.successful.len(),
            failed = response.failed.len(),
            "enqueue finished"
        );
        Ok(response)
    }

    fn build_job(
        &self,
        request: &EnqueueRequest,
        project: &str,
        experiment: &str,
        run_id: RunId,
        item: &SetItem,
    ) -> PipelineJob {
        PipelineJob {
            ground_truth_uri: item.ground_truth_uri.clone(),
            inference_uri: item
                .inference_uri
                .clone()
                .unwrap_or_else(|| locator(&self.config.inference_prefix, run_id, &item.reference)),
            evaluation_uri: locator(&self.config.evaluation_prefix, run_id, &item.reference),
            project: project.to_string(),
            experiment: experiment.to_string(),
            reference: item.reference.clone(),
            set: request.set.to_string(),
            is_baseline: request.is_baseline,
            run_id: Some(run_id),
        }
    }
}
