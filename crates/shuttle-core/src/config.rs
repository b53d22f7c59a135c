//! Shuttle configuration types and loading

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::scheduler::SchedulerConfig;

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheduler settings
    pub scheduler: SchedulerConfig,

    /// Named rate limiters, handed to task bodies by the embedding program
    #[serde(rename = "rate-limits")]
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
}

impl Config {
    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Fail fast on anything that would only break at start-up.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        for (name, limit) in &self.rate_limits {
            RateLimiter::new(limit.clone()).map_err(|source| ConfigError::RateLimit {
                name: name.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Build one limiter per `rate-limits` entry.
    pub fn rate_limiters(&self) -> Result<BTreeMap<String, Arc<RateLimiter>>, ConfigError> {
        self.rate_limits
            .iter()
            .map(|(name, limit)| {
                RateLimiter::new(limit.clone())
                    .map(|limiter| (name.clone(), Arc::new(limiter)))
                    .map_err(|source| ConfigError::RateLimit {
                        name: name.clone(),
                        source,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use crate::ratelimit::Algorithm;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"
scheduler:
  max-workers: 2
  poll-interval-ms: 20
  checkpoint-dir: .shuttle/checkpoints
  report-dir: .shuttle/reports
rate-limits:
  upstream:
    max_requests: 5
    time_window: 1.0
  bursty:
    max_requests: 10
    time_window: 2
    algorithm: token_bucket
    bucket_size: 3
"#;

    #[test]
    fn test_load_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shuttle.yml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.scheduler.max_workers, 2);
        assert_eq!(config.scheduler.queue_capacity, 64);
        assert_eq!(
            config.scheduler.checkpoint_dir,
            Some(PathBuf::from(".shuttle/checkpoints"))
        );
        assert_eq!(config.rate_limits.len(), 2);
        assert_eq!(config.rate_limits["bursty"].algorithm, Algorithm::TokenBucket);

        let limiters = config.rate_limiters().unwrap();
        assert_eq!(limiters["upstream"].max_requests(), 5);
        assert_eq!(limiters["bursty"].bucket_size(), 3);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load("/definitely/not/here.yml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "scheduler: [not, a, map]").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_zero_workers() {
        let mut config = Config::default();
        config.scheduler.max_workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Scheduler(BuildError::NoWorkers))
        ));
    }

    #[test]
    fn test_validate_names_bad_rate_limit() {
        let mut config = Config::default();
        config
            .rate_limits
            .insert("broken".into(), RateLimitConfig::default());
        match config.validate() {
            Err(ConfigError::RateLimit { name, .. }) => assert_eq!(name, "broken"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
