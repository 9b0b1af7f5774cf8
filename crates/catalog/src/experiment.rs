use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use evalhub_core::{ExperimentName, ResultId, RunId, SetName};

/// Idempotency key of a job-produced result within one experiment.
///
/// A redelivered job carries the same `(set, ref)` pair, so a second append
/// with the same key is recognised as a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultKey {
    pub set: SetName,
    #[serde(rename = "ref")]
    pub reference: String,
}

impl core::fmt::Display for ResultKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.set, self.reference)
    }
}

/// One evaluation result. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    #[serde(default = "ResultId::new")]
    pub id: ResultId,

    /// Primary score; `None` when the job produced no comparable value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Additional named metrics reported by the evaluation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<SetName>,

    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_uri: Option<String>,

    /// Marks the run that established this experiment's own baseline set.
    #[serde(default)]
    pub is_baseline: bool,

    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

impl EvalResult {
    pub fn new(score: Option<f64>) -> Self {
        Self {
            id: ResultId::new(),
            score,
            metrics: BTreeMap::new(),
            set: None,
            reference: None,
            run_id: None,
            inference_uri: None,
            evaluation_uri: None,
            is_baseline: false,
            created: Utc::now(),
        }
    }

    pub fn for_job(set: SetName, reference: impl Into<String>, score: Option<f64>) -> Self {
        Self {
            set: Some(set),
            reference: Some(reference.into()),
            ..Self::new(score)
        }
    }

    pub fn with_metrics(mut self, metrics: BTreeMap<String, f64>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Dedupe key; only results produced by a job (set + ref) have one.
    pub fn key(&self) -> Option<ResultKey> {
        match (&self.set, &self.reference) {
            (Some(set), Some(reference)) => Some(ResultKey {
                set: set.clone(),
                reference: reference.clone(),
            }),
            _ => None,
        }
    }
}

/// Request to create an experiment explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExperiment {
    pub name: ExperimentName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,
}

/// An experiment within a project: an insertion-ordered result sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: ExperimentName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,
    #[serde(default)]
    pub results: Vec<EvalResult>,
    #[serde(default)]
    pub is_baseline: bool,
    pub created: DateTime<Utc>,
}

impl Experiment {
    pub fn new(name: ExperimentName) -> Self {
        Self {
            name,
            hypothesis: None,
            results: Vec::new(),
            is_baseline: false,
            created: Utc::now(),
        }
    }

    pub fn from_request(req: NewExperiment) -> Self {
        Self {
            hypothesis: req.hypothesis,
            ..Self::new(req.name)
        }
    }

    pub fn contains_key(&self, key: &ResultKey) -> bool {
        self.results.iter().any(|r| r.key().as_ref() == Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_requires_set_and_ref() {
        let set = SetName::new("nightly").unwrap();
        assert!(EvalResult::new(Some(1.0)).key().is_none());

        let r = EvalResult::for_job(set.clone(), "q-001", Some(1.0));
        assert_eq!(
            r.key(),
            Some(ResultKey {
                set,
                reference: "q-001".to_string()
            })
        );
    }

    #[test]
    fn absent_score_is_omitted_on_write() {
        let r = EvalResult::new(None);
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("score").is_none());
        assert!(json.get("ref").is_none());
        assert_eq!(json["is_baseline"], false);
    }
}
