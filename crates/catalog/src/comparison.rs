use serde::{Deserialize, Serialize};

use evalhub_core::ExperimentName;

use crate::experiment::Experiment;
use crate::summary::SetSummary;

/// Side-by-side view of an experiment against the project baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub experiment: ExperimentName,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_experiment: Option<ExperimentName>,

    /// Last set of the project's baseline experiment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_baseline: Option<SetSummary>,

    /// The chosen experiment's own baseline set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_baseline: Option<SetSummary>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<SetSummary>,
}

impl Comparison {
    pub fn between(baseline: Option<&Experiment>, chosen: &Experiment) -> Self {
        Self {
            experiment: chosen.name.clone(),
            baseline_experiment: baseline.map(|b| b.name.clone()),
            project_baseline: baseline.and_then(Experiment::last_set),
            experiment_baseline: chosen.baseline_set(),
            last: chosen.last_set(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::EvalResult;
    use evalhub_core::SetName;

    #[test]
    fn compares_against_baseline_last_set() {
        let nightly = SetName::new("nightly").unwrap();
        let mut base = Experiment::new(ExperimentName::new("control").unwrap());
        base.results.push(EvalResult::for_job(nightly.clone(), "a", Some(0.5)));

        let mut chosen = Experiment::new(ExperimentName::new("treatment").unwrap());
        chosen.results.push(EvalResult::for_job(nightly.clone(), "a", Some(0.7)));

        let cmp = Comparison::between(Some(&base), &chosen);
        assert_eq!(cmp.baseline_experiment.as_ref().unwrap().as_str(), "control");
        assert!((cmp.project_baseline.unwrap().score.unwrap().mean - 0.5).abs() < 1e-9);
        assert!((cmp.last.unwrap().score.unwrap().mean - 0.7).abs() < 1e-9);
        assert_eq!(cmp.experiment_baseline.unwrap().set, Some(nightly));
    }

    #[test]
    fn without_baseline_only_own_sets_are_reported() {
        let chosen = Experiment::new(ExperimentName::new("treatment").unwrap());
        let cmp = Comparison::between(None, &chosen);
        assert!(cmp.project_baseline.is_none());
        assert!(cmp.last.is_none());
        let json = serde_json::to_value(&cmp).unwrap();
        assert_eq!(json, serde_json::json!({ "experiment": "treatment" }));
    }
}
