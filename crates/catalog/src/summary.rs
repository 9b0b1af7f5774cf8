//! Per-set aggregation of an experiment's results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use evalhub_core::{SetName, mean, std_dev};

use crate::experiment::{EvalResult, Experiment};

/// Count, mean and population standard deviation of one series.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of present values that went into the statistics.
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Summary {
    /// `None` when no value is present.
    pub fn of<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let present: Vec<f64> = values.into_iter().flatten().collect();
        let mean = mean(present.iter().copied().map(Some))?;
        let std_dev = std_dev(present.iter().copied().map(Some))?;
        Some(Self {
            count: present.len(),
            mean,
            std_dev,
        })
    }
}

/// Aggregate of all results an experiment recorded for one set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<SetName>,
    pub results: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Summary>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, Summary>,
}

impl SetSummary {
    fn from_results<'a>(set: Option<&SetName>, results: impl Iterator<Item = &'a EvalResult>) -> Self {
        let results: Vec<&EvalResult> = results.collect();

        let mut series: BTreeMap<&str, Vec<Option<f64>>> = BTreeMap::new();
        for r in &results {
            for (name, value) in &r.metrics {
                series.entry(name.as_str()).or_default().push(Some(*value));
            }
        }

        Self {
            set: set.cloned(),
            results: results.len(),
            score: Summary::of(results.iter().map(|r| r.score)),
            metrics: series
                .into_iter()
                .filter_map(|(name, values)| Summary::of(values).map(|s| (name.to_string(), s)))
                .collect(),
        }
    }
}

impl Experiment {
    /// Distinct set names in order of first appearance.
    ///
    /// Results written without a set are grouped under `None`.
    pub fn sets(&self) -> Vec<Option<&SetName>> {
        let mut seen: Vec<Option<&SetName>> = Vec::new();
        for r in &self.results {
            let set = r.set.as_ref();
            if !seen.contains(&set) {
                seen.push(set);
            }
        }
        seen
    }

    pub fn aggregate_set(&self, set: Option<&SetName>) -> Option<SetSummary> {
        let mut matching = self.results.iter().filter(|r| r.set.as_ref() == set).peekable();
        matching.peek()?;
        Some(SetSummary::from_results(set, matching))
    }

    pub fn first_set(&self) -> Option<SetSummary> {
        let first = self.results.first()?;
        self.aggregate_set(first.set.as_ref())
    }

    pub fn last_set(&self) -> Option<SetSummary> {
        let last = self.results.last()?;
        self.aggregate_set(last.set.as_ref())
    }

    /// The set of the first result flagged as a baseline run, else the first set.
    pub fn baseline_set(&self) -> Option<SetSummary> {
        match self.results.iter().find(|r| r.is_baseline) {
            Some(r) => self.aggregate_set(r.set.as_ref()),
            None => self.first_set(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalhub_core::ExperimentName;

    fn set(name: &str) -> SetName {
        SetName::new(name).unwrap()
    }

    fn experiment() -> Experiment {
        Experiment::new(ExperimentName::new("run-a").unwrap())
    }

    #[test]
    fn summary_skips_absent_scores() {
        let s = Summary::of([Some(10.0), Some(12.0), Some(14.0), None]).unwrap();
        assert_eq!(s.count, 3);
        assert!((s.mean - 12.0).abs() < 1e-9);
        assert!((s.std_dev - 1.633).abs() < 1e-3);
        assert!(Summary::of([None]).is_none());
    }

    #[test]
    fn aggregates_score_and_metrics_per_set() {
        let mut e = experiment();
        let mut m1 = BTreeMap::new();
        m1.insert("latency".to_string(), 100.0);
        let mut m2 = BTreeMap::new();
        m2.insert("latency".to_string(), 300.0);

        e.results.push(EvalResult::for_job(set("nightly"), "a", Some(1.0)).with_metrics(m1));
        e.results.push(EvalResult::for_job(set("nightly"), "b", Some(3.0)).with_metrics(m2));
        e.results.push(EvalResult::for_job(set("weekly"), "a", Some(9.0)));

        let nightly = e.aggregate_set(Some(&set("nightly"))).unwrap();
        assert_eq!(nightly.results, 2);
        let score = nightly.score.unwrap();
        assert!((score.mean - 2.0).abs() < 1e-9);
        assert!((score.std_dev - 1.0).abs() < 1e-9);
        assert!((nightly.metrics["latency"].mean - 200.0).abs() < 1e-9);

        assert_eq!(e.sets(), vec![Some(&set("nightly")), Some(&set("weekly"))]);
        assert_eq!(e.first_set().unwrap().set, Some(set("nightly")));
        assert_eq!(e.last_set().unwrap().set, Some(set("weekly")));
    }

    #[test]
    fn set_with_only_absent_scores_has_no_score_summary() {
        let mut e = experiment();
        e.results.push(EvalResult::for_job(set("nightly"), "a", None));
        let s = e.aggregate_set(Some(&set("nightly"))).unwrap();
        assert_eq!(s.results, 1);
        assert!(s.score.is_none());
    }

    #[test]
    fn baseline_set_prefers_flagged_run() {
        let mut e = experiment();
        e.results.push(EvalResult::for_job(set("warmup"), "a", Some(1.0)));
        let mut flagged = EvalResult::for_job(set("nightly"), "a", Some(2.0));
        flagged.is_baseline = true;
        e.results.push(flagged);

        assert_eq!(e.baseline_set().unwrap().set, Some(set("nightly")));
        assert!(experiment().baseline_set().is_none());
    }
}
