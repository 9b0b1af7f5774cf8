//! Evaluation pipeline reached over HTTP.
//!
//! POSTs the locators as JSON to the evaluation endpoint. Status codes listed
//! as dead-letter codes are permanent failures; every other non-success
//! status and every transport error is transient. A success body may carry
//! `{score, metrics}`, and `x-metric-<name>` response headers are merged into
//! the metrics.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tracing::{debug, instrument};

use super::{Evaluation, EvaluationPipeline, EvaluationRequest, PipelineError};

const METRIC_HEADER_PREFIX: &str = "x-metric-";

#[derive(Debug, Clone)]
pub struct HttpEvaluationPipeline {
    client: reqwest::Client,
    url: String,
    dead_letter_statuses: Vec<u16>,
}

impl HttpEvaluationPipeline {
    pub fn new(url: impl Into<String>, dead_letter_statuses: Vec<u16>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            dead_letter_statuses,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

fn header_metrics(headers: &HeaderMap) -> BTreeMap<String, f64> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let metric = name.as_str().strip_prefix(METRIC_HEADER_PREFIX)?;
            let value = value.to_str().ok()?.trim().parse::<f64>().ok()?;
            Some((metric.to_string(), value))
        })
        .collect()
}

#[async_trait]
impl EvaluationPipeline for HttpEvaluationPipeline {
    #[instrument(skip(self, request), fields(url = %self.url, evaluation_uri = %request.evaluation_uri))]
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, PipelineError> {
        let resp = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!("evaluation endpoint returned {status}: {body}");
            return Err(if self.dead_letter_statuses.contains(&status.as_u16()) {
                PipelineError::Permanent(msg)
            } else {
                PipelineError::Transient(msg)
            });
        }

        let from_headers = header_metrics(resp.headers());
        let body = resp
            .bytes()
            .await
            .map_err(|e| PipelineError::Transient(format!("reading response failed: {e}")))?;

        let mut evaluation = if body.iter().all(u8::is_ascii_whitespace) {
            Evaluation::default()
        } else {
            serde_json::from_slice::<Evaluation>(&body)
                .map_err(|e| PipelineError::Permanent(format!("unparseable evaluation: {e}")))?
        };
        evaluation.metrics.extend(from_headers);

        debug!(score = ?evaluation.score, metrics = evaluation.metrics.len(), "evaluation finished");
        Ok(evaluation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    #[test]
    fn collects_numeric_metric_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-metric-recall"), HeaderValue::from_static("0.75"));
        headers.insert(HeaderName::from_static("x-metric-bad"), HeaderValue::from_static("n/a"));
        headers.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("application/json"));

        let metrics = header_metrics(&headers);
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics["recall"], 0.75);
    }
}
