use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use evalhub_catalog::{AppendOutcome, EvalResult, Experiment, NewExperiment, Project};
use evalhub_core::{ExperimentName, ProjectName};

use super::{ExperimentStore, StoreError};

/// In-memory experiment store for tests/dev.
///
/// One lock guards every project, so a baseline change and its flag updates
/// are a single critical section.
#[derive(Debug, Default)]
pub struct InMemoryExperimentStore {
    projects: RwLock<HashMap<ProjectName, Project>>,
}

impl InMemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ProjectName, Project>> {
        self.projects.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ProjectName, Project>> {
        self.projects.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ExperimentStore for InMemoryExperimentStore {
    async fn list_experiments(&self, project: &ProjectName) -> Result<Vec<Experiment>, StoreError> {
        Ok(self
            .read()
            .get(project)
            .map(|p| p.experiments().to_vec())
            .unwrap_or_default())
    }

    async fn add_experiment(
        &self,
        project: &ProjectName,
        experiment: NewExperiment,
    ) -> Result<Experiment, StoreError> {
        let mut projects = self.write();
        let p = projects
            .entry(project.clone())
            .or_insert_with(|| Project::new(project.clone()));
        Ok(p.add_experiment(experiment)?.clone())
    }

    async fn set_baseline(
        &self,
        project: &ProjectName,
        experiment: &ExperimentName,
    ) -> Result<(), StoreError> {
        let mut projects = self.write();
        let p = projects
            .get_mut(project)
            .ok_or_else(|| StoreError::NotFound(format!("project {project}")))?;
        p.set_baseline(experiment)?;
        Ok(())
    }

    async fn append_result(
        &self,
        project: &ProjectName,
        experiment: &ExperimentName,
        result: EvalResult,
    ) -> Result<AppendOutcome, StoreError> {
        let mut projects = self.write();
        let p = projects
            .entry(project.clone())
            .or_insert_with(|| Project::new(project.clone()));
        Ok(p.append_result(experiment, result))
    }

    async fn get_baseline(&self, project: &ProjectName) -> Result<Option<Experiment>, StoreError> {
        Ok(self.read().get(project).and_then(|p| p.baseline().cloned()))
    }

    async fn get_experiment(
        &self,
        project: &ProjectName,
        experiment: &ExperimentName,
    ) -> Result<Option<Experiment>, StoreError> {
        Ok(self
            .read()
            .get(project)
            .and_then(|p| p.experiment(experiment).cloned()))
    }
}
