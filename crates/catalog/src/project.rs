use serde::{Deserialize, Serialize};

use evalhub_core::{DomainError, DomainResult, ExperimentName, ProjectName};

use crate::experiment::{EvalResult, Experiment, NewExperiment};

/// Outcome of appending a result to an experiment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendOutcome {
    Appended,
    /// A result with the same dedupe key already exists; nothing was written.
    Duplicate,
}

/// Project aggregate: owns its experiments and the baseline pointer.
///
/// The baseline is a single `Option<ExperimentName>`; the per-experiment
/// `is_baseline` flags are derived from it on every change, so at most one
/// experiment is ever flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    name: ProjectName,
    baseline: Option<ExperimentName>,
    experiments: Vec<Experiment>,
}

impl Project {
    pub fn new(name: ProjectName) -> Self {
        Self {
            name,
            baseline: None,
            experiments: Vec::new(),
        }
    }

    pub fn name(&self) -> &ProjectName {
        &self.name
    }

    pub fn baseline_name(&self) -> Option<&ExperimentName> {
        self.baseline.as_ref()
    }

    pub fn experiments(&self) -> &[Experiment] {
        &self.experiments
    }

    pub fn experiment(&self, name: &ExperimentName) -> Option<&Experiment> {
        self.experiments.iter().find(|e| &e.name == name)
    }

    pub fn baseline(&self) -> Option<&Experiment> {
        self.baseline.as_ref().and_then(|b| self.experiment(b))
    }

    /// Create an experiment explicitly. Fails if the name is taken.
    pub fn add_experiment(&mut self, req: NewExperiment) -> DomainResult<&Experiment> {
        if self.experiment(&req.name).is_some() {
            return Err(DomainError::conflict(format!(
                "experiment {} already exists in project {}",
                req.name, self.name
            )));
        }
        let idx = self.experiments.len();
        self.experiments.push(Experiment::from_request(req));
        Ok(&self.experiments[idx])
    }

    /// Point the project baseline at `name`, clearing any previous baseline.
    pub fn set_baseline(&mut self, name: &ExperimentName) -> DomainResult<()> {
        if self.experiment(name).is_none() {
            return Err(DomainError::not_found(format!(
                "experiment {} in project {}",
                name, self.name
            )));
        }
        self.baseline = Some(name.clone());
        for e in &mut self.experiments {
            e.is_baseline = &e.name == name;
        }
        Ok(())
    }

    /// Append a result, creating the experiment on first write.
    ///
    /// Results with a dedupe key already present in the experiment are dropped.
    pub fn append_result(&mut self, name: &ExperimentName, result: EvalResult) -> AppendOutcome {
        let idx = match self.experiments.iter().position(|e| &e.name == name) {
            Some(idx) => idx,
            None => {
                let mut e = Experiment::new(name.clone());
                e.is_baseline = self.baseline.as_ref() == Some(name);
                self.experiments.push(e);
                self.experiments.len() - 1
            }
        };

        let experiment = &mut self.experiments[idx];
        if let Some(key) = result.key() {
            if experiment.contains_key(&key) {
                return AppendOutcome::Duplicate;
            }
        }
        experiment.results.push(result);
        AppendOutcome::Appended
    }
}
