//! Resolution of a set name into the concrete jobs it stands for.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use evalhub_core::{ExperimentName, ProjectName, SetName};

/// One ground-truth/inference pair of a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetItem {
    #[serde(rename = "ref")]
    pub reference: String,
    pub ground_truth_uri: String,
    /// When absent the enqueuer derives a per-run inference locator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_uri: Option<String>,
}

/// A set definition: where its results go and what it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSet {
    pub project: ProjectName,
    pub experiment: ExperimentName,
    #[serde(default)]
    pub items: Vec<SetItem>,
}

/// Resolution failed (as opposed to the set simply being unknown).
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("failed to read set {set}: {source}")]
    Io {
        set: String,
        #[source]
        source: std::io::Error,
    },

    #[error("set {set} is corrupt: {detail}")]
    Corrupt { set: String, detail: String },
}

impl ResolvedSet {
    /// Every item needs a non-empty ref and locators, and refs are unique
    /// within the set: a ref is the job id and half of the result dedupe key.
    pub fn check(&self, set: &SetName) -> Result<(), ResolutionError> {
        let corrupt = |detail: String| ResolutionError::Corrupt {
            set: set.to_string(),
            detail,
        };

        let mut seen = HashSet::with_capacity(self.items.len());
        for (idx, item) in self.items.iter().enumerate() {
            if item.reference.trim().is_empty() {
                return Err(corrupt(format!("item {idx} has an empty ref")));
            }
            if item.ground_truth_uri.trim().is_empty() {
                return Err(corrupt(format!("item {} has an empty ground_truth_uri", item.reference)));
            }
            if item.inference_uri.as_deref().is_some_and(|u| u.trim().is_empty()) {
                return Err(corrupt(format!("item {} has an empty inference_uri", item.reference)));
            }
            if !seen.insert(item.reference.as_str()) {
                return Err(corrupt(format!("ref {} appears more than once", item.reference)));
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait SetResolver: Send + Sync {
    /// `Ok(None)` for an unknown set.
    async fn resolve(&self, set: &SetName) -> Result<Option<ResolvedSet>, ResolutionError>;
}

/// In-memory set catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySetCatalog {
    sets: RwLock<HashMap<SetName, ResolvedSet>>,
}

impl InMemorySetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: SetName, set: ResolvedSet) {
        self.sets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, set);
    }
}

#[async_trait]
impl SetResolver for InMemorySetCatalog {
    async fn resolve(&self, set: &SetName) -> Result<Option<ResolvedSet>, ResolutionError> {
        Ok(self
            .sets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(set)
            .cloned())
    }
}

/// Reads set definitions from `{dir}/{set}.json`.
#[derive(Debug, Clone)]
pub struct ManifestSetResolver {
    dir: PathBuf,
}

impl ManifestSetResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SetResolver for ManifestSetResolver {
    async fn resolve(&self, set: &SetName) -> Result<Option<ResolvedSet>, ResolutionError> {
        // Set names cannot contain path separators, so this stays inside `dir`.
        let path = self.dir.join(format!("{set}.json"));
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ResolutionError::Io {
                    set: set.to_string(),
                    source,
                });
            }
        };

        let resolved = serde_json::from_slice(&raw).map_err(|e| ResolutionError::Corrupt {
            set: set.to_string(),
            detail: e.to_string(),
        })?;
        Ok(Some(resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("evalhub-sets-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn set(name: &str) -> SetName {
        SetName::new(name).unwrap()
    }

    #[tokio::test]
    async fn manifest_missing_means_unknown_set() {
        let resolver = ManifestSetResolver::new(scratch_dir());
        assert!(resolver.resolve(&set("nightly")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn manifest_is_parsed() {
        let dir = scratch_dir();
        std::fs::write(
            dir.join("nightly.json"),
            r#"{
                "project": "search",
                "experiment": "bm25-tuned",
                "items": [
                    {"ref": "q-1", "ground_truth_uri": "gt/q-1.json"},
                    {"ref": "q-2", "ground_truth_uri": "gt/q-2.json", "inference_uri": "inf/q-2.json"}
                ]
            }"#,
        )
        .unwrap();

        let resolved = ManifestSetResolver::new(&dir)
            .resolve(&set("nightly"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.project.as_str(), "search");
        assert_eq!(resolved.items.len(), 2);
        assert_eq!(resolved.items[1].inference_uri.as_deref(), Some("inf/q-2.json"));
    }

    #[tokio::test]
    async fn corrupt_manifest_is_a_resolution_error() {
        let dir = scratch_dir();
        std::fs::write(dir.join("nightly.json"), "{ not json").unwrap();
        let err = ManifestSetResolver::new(&dir)
            .resolve(&set("nightly"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn in_memory_catalog_round_trips() {
        let catalog = InMemorySetCatalog::new();
        assert!(catalog.resolve(&set("nightly")).await.unwrap().is_none());

        catalog.insert(
            set("nightly"),
            ResolvedSet {
                project: ProjectName::new("search").unwrap(),
                experiment: ExperimentName::new("bm25-tuned").unwrap(),
                items: vec![],
            },
        );
        assert!(catalog.resolve(&set("nightly")).await.unwrap().is_some());
    }

    fn with_refs(refs: &[&str]) -> ResolvedSet {
        ResolvedSet {
            project: ProjectName::new("search").unwrap(),
            experiment: ExperimentName::new("bm25-tuned").unwrap(),
            items: refs
                .iter()
                .enumerate()
                .map(|(i, r)| SetItem {
                    reference: r.to_string(),
                    ground_truth_uri: format!("gt/{i}.json"),
                    inference_uri: None,
                })
                .collect(),
        }
    }

    #[test]
    fn check_accepts_unique_refs() {
        assert!(with_refs(&["q-1", "q-2"]).check(&set("nightly")).is_ok());
        assert!(with_refs(&[]).check(&set("nightly")).is_ok());
    }

    #[test]
    fn check_rejects_repeated_refs() {
        let err = with_refs(&["q-1", "q-2", "q-1"]).check(&set("nightly")).unwrap_err();
        match err {
            ResolutionError::Corrupt { set, detail } => {
                assert_eq!(set, "nightly");
                assert!(detail.contains("q-1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn check_rejects_empty_refs_and_locators() {
        assert!(matches!(
            with_refs(&["q-1", " "]).check(&set("nightly")),
            Err(ResolutionError::Corrupt { .. })
        ));

        let mut resolved = with_refs(&["q-1"]);
        resolved.items[0].ground_truth_uri.clear();
        assert!(matches!(resolved.check(&set("nightly")), Err(ResolutionError::Corrupt { .. })));

        let mut resolved = with_refs(&["q-1"]);
        resolved.items[0].inference_uri = Some(String::new());
        assert!(matches!(resolved.check(&set("nightly")), Err(ResolutionError::Corrupt { .. })));
    }
}
