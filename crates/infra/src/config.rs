//! Process configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::jobs::{ConsumerConfig, EnqueuerConfig};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorConfig {
    pub port: u16,
    pub concurrency: usize,
    pub max_deliveries: u32,
    pub visibility_timeout: Duration,
    pub pause_when_empty: Duration,
    pub pipeline_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Without an evaluation URL the consumer is not started.
    pub evaluation_url: Option<String>,
    pub dead_letter_statuses: Vec<u16>,
    /// Directory of `{set}.json` manifests; in-memory catalog when unset.
    pub sets_dir: Option<PathBuf>,
    pub inference_prefix: String,
    pub evaluation_prefix: String,
    pub redis_url: Option<String>,
    pub queue_key: Option<String>,
    pub dead_letter_key: Option<String>,
    pub consumer_group: Option<String>,
    pub database_url: Option<String>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            concurrency: 4,
            max_deliveries: 5,
            visibility_timeout: Duration::from_secs(300),
            pause_when_empty: Duration::from_millis(500),
            pipeline_timeout: Duration::from_secs(240),
            shutdown_grace: Duration::from_secs(30),
            evaluation_url: None,
            dead_letter_statuses: vec![400, 404, 422],
            sets_dir: None,
            inference_prefix: "inference".to_string(),
            evaluation_prefix: "evaluation".to_string(),
            redis_url: None,
            queue_key: None,
            dead_letter_key: None,
            consumer_group: None,
            database_url: None,
        }
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_status_list(key: &'static str, raw: &str) -> Result<Vec<u16>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse::<u16>(key, s))
        .collect()
}

impl EvaluatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PORT") {
            cfg.port = parse("PORT", &v)?;
        }
        if let Some(v) = get("CONCURRENCY") {
            cfg.concurrency = parse("CONCURRENCY", &v)?;
            if cfg.concurrency == 0 {
                return Err(ConfigError::Invalid {
                    key: "CONCURRENCY",
                    value: v,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if let Some(v) = get("MAX_DELIVERIES") {
            cfg.max_deliveries = parse("MAX_DELIVERIES", &v)?;
            if cfg.max_deliveries == 0 {
                return Err(ConfigError::Invalid {
                    key: "MAX_DELIVERIES",
                    value: v,
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if let Some(v) = get("VISIBILITY_TIMEOUT_SECS") {
            cfg.visibility_timeout = Duration::from_secs(parse("VISIBILITY_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("MS_TO_PAUSE_WHEN_EMPTY") {
            cfg.pause_when_empty = Duration::from_millis(parse("MS_TO_PAUSE_WHEN_EMPTY", &v)?);
        }
        if let Some(v) = get("PIPELINE_TIMEOUT_SECS") {
            cfg.pipeline_timeout = Duration::from_secs(parse("PIPELINE_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("SHUTDOWN_GRACE_SECS") {
            cfg.shutdown_grace = Duration::from_secs(parse("SHUTDOWN_GRACE_SECS", &v)?);
        }
        if let Some(v) = get("DEADLETTER_ON_STATUS_CODES") {
            cfg.dead_letter_statuses = parse_status_list("DEADLETTER_ON_STATUS_CODES", &v)?;
        }
        if let Some(v) = get("INFERENCE_PREFIX") {
            cfg.inference_prefix = v;
        }
        if let Some(v) = get("EVALUATION_PREFIX") {
            cfg.evaluation_prefix = v;
        }

        // A job still running when its lease expires would be evaluated twice.
        if cfg.pipeline_timeout >= cfg.visibility_timeout {
            return Err(ConfigError::Invalid {
                key: "PIPELINE_TIMEOUT_SECS",
                value: cfg.pipeline_timeout.as_secs().to_string(),
                reason: format!(
                    "must be shorter than the visibility timeout ({}s)",
                    cfg.visibility_timeout.as_secs()
                ),
            });
        }

        cfg.evaluation_url = get("EVALUATION_URL");
        cfg.sets_dir = get("SETS_DIR").map(PathBuf::from);
        cfg.redis_url = get("REDIS_URL");
        cfg.queue_key = get("QUEUE_KEY");
        cfg.dead_letter_key = get("DEADLETTER_KEY");
        cfg.consumer_group = get("CONSUMER_GROUP");
        cfg.database_url = get("DATABASE_URL");

        Ok(cfg)
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            concurrency: self.concurrency,
            max_deliveries: self.max_deliveries,
            pause_when_empty: self.pause_when_empty,
            pipeline_timeout: self.pipeline_timeout,
            shutdown_grace: self.shutdown_grace,
            ..ConsumerConfig::default()
        }
    }

    pub fn enqueuer(&self) -> EnqueuerConfig {
        EnqueuerConfig {
            inference_prefix: self.inference_prefix.clone(),
            evaluation_prefix: self.evaluation_prefix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(pairs: &[(&str, &str)]) -> Result<EvaluatorConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EvaluatorConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(from(&[]).unwrap(), EvaluatorConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = from(&[
            ("CONCURRENCY", "8"),
            ("MS_TO_PAUSE_WHEN_EMPTY", "250"),
            ("DEADLETTER_ON_STATUS_CODES", "400, 410"),
            ("EVALUATION_URL", "http://evaluator:9000/evaluate"),
        ])
        .unwrap();
        assert_eq!(cfg.concurrency, 8);
        assert_eq!(cfg.pause_when_empty, Duration::from_millis(250));
        assert_eq!(cfg.dead_letter_statuses, vec![400, 410]);
        assert_eq!(cfg.evaluation_url.as_deref(), Some("http://evaluator:9000/evaluate"));
        assert_eq!(cfg.consumer().concurrency, 8);
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(matches!(
            from(&[("MAX_DELIVERIES", "lots")]),
            Err(ConfigError::Invalid { key: "MAX_DELIVERIES", .. })
        ));
        assert!(matches!(
            from(&[("CONCURRENCY", "0")]),
            Err(ConfigError::Invalid { key: "CONCURRENCY", .. })
        ));
        assert!(matches!(
            from(&[("MAX_DELIVERIES", "0")]),
            Err(ConfigError::Invalid { key: "MAX_DELIVERIES", .. })
        ));
    }

    #[test]
    fn pipeline_timeout_must_fit_inside_visibility_timeout() {
        let defaults = EvaluatorConfig::default();
        assert!(defaults.pipeline_timeout < defaults.visibility_timeout);

        assert!(matches!(
            from(&[("PIPELINE_TIMEOUT_SECS", "300")]),
            Err(ConfigError::Invalid { key: "PIPELINE_TIMEOUT_SECS", .. })
        ));
        assert!(matches!(
            from(&[("VISIBILITY_TIMEOUT_SECS", "60")]),
            Err(ConfigError::Invalid { key: "PIPELINE_TIMEOUT_SECS", .. })
        ));

        let cfg = from(&[("PIPELINE_TIMEOUT_SECS", "50"), ("VISIBILITY_TIMEOUT_SECS", "60")]).unwrap();
        assert_eq!(cfg.consumer().pipeline_timeout, Duration::from_secs(50));
    }
}
