//! Pipeline configuration.
//!
//! Loaded from TOML, then overridden by `PLOTFLOW_*` environment variables:
//!
//! | Variable                      | Field                         |
//! |-------------------------------|-------------------------------|
//! | `PLOTFLOW_CONCURRENCY`        | `fanout.concurrency_limit`    |
//! | `PLOTFLOW_WORKERS`            | `parallel.worker_count`       |
//! | `PLOTFLOW_TASK_TIMEOUT_SECS`  | `parallel.task_timeout_secs`  |
//! | `PLOTFLOW_VERBOSITY`          | `logging.verbosity`           |

use crate::core::StageId;
use crate::errors::ConfigError;
use crate::executor::RetryPolicy;
use crate::observability::LoggingConfig;
use crate::pipeline::GatePolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound of the default worker count.
pub const MAX_DEFAULT_WORKERS: usize = 12;

/// Settings of the bounded-concurrency executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutConfig {
    /// Maximum tasks in flight.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Per-task retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_concurrency_limit() -> usize {
    3
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Settings of the parallel batch executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Worker threads running at once.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Per-task timeout in seconds.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .min(MAX_DEFAULT_WORKERS)
}

fn default_task_timeout_secs() -> u64 {
    120
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

impl ParallelConfig {
    /// The per-task timeout.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Top-level configuration consumed by the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Gate policy overrides keyed by gate id.
    #[serde(default)]
    pub gates: BTreeMap<StageId, GatePolicy>,
    /// Bounded executor settings.
    #[serde(default)]
    pub fanout: FanOutConfig,
    /// Parallel executor settings.
    #[serde(default)]
    pub parallel: ParallelConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Loads a file if given (defaults otherwise), applies the process
    /// environment and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        let config = config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides a gate's policy.
    #[must_use]
    pub fn with_gate(mut self, gate: impl Into<StageId>, policy: GatePolicy) -> Self {
        self.gates.insert(gate.into(), policy);
        self
    }

    /// Applies `PLOTFLOW_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Applies `PLOTFLOW_*` overrides from an arbitrary lookup.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "PLOTFLOW_CONCURRENCY")? {
            self.fanout.concurrency_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "PLOTFLOW_WORKERS")? {
            self.parallel.worker_count = v;
        }
        if let Some(v) = parse_var(&lookup, "PLOTFLOW_TASK_TIMEOUT_SECS")? {
            self.parallel.task_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "PLOTFLOW_VERBOSITY")? {
            self.logging.verbosity = v;
        }
        Ok(self)
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fanout.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "fanout.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.fanout.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "fanout.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.fanout.retry.base_delay_ms > self.fanout.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "fanout.retry.base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }
        if self.parallel.worker_count == 0 {
            return Err(ConfigError::Invalid(
                "parallel.worker_count must be at least 1".to_string(),
            ));
        }
        if self.parallel.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "parallel.task_timeout_secs must be at least 1".to_string(),
            ));
        }
        for (gate, policy) in &self.gates {
            if &policy.retry_target == gate {
                return Err(ConfigError::Invalid(format!(
                    "gate '{gate}' cannot retry to itself"
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim().parse().map(Some).map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.fanout.concurrency_limit, 3);
        assert_eq!(config.fanout.retry.max_attempts, 3);
        assert_eq!(config.parallel.task_timeout(), Duration::from_secs(120));
        assert!(config.parallel.worker_count >= 1);
        assert!(config.parallel.worker_count <= MAX_DEFAULT_WORKERS);
        assert!(config.gates.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [gates.logic_validation]
            retry_target = "crime"
            max_retries = 5

            [fanout]
            concurrency_limit = 8

            [fanout.retry]
            max_attempts = 4
            base_delay_ms = 250

            [parallel]
            worker_count = 2
            task_timeout_secs = 30

            [logging]
            verbosity = 1
            format = "json"
            "#,
        )
        .unwrap();

        let gate = &config.gates["logic_validation"];
        assert_eq!(gate.retry_target, StageId::new("crime"));
        assert_eq!(gate.max_retries, 5);
        assert_eq!(config.fanout.concurrency_limit, 8);
        assert_eq!(config.fanout.retry.max_attempts, 4);
        assert_eq!(config.fanout.retry.max_delay_ms, 30_000);
        assert_eq!(config.parallel.worker_count, 2);
        assert_eq!(config.logging.verbosity, 1);
    }

    #[test]
    fn test_parse_error() {
        let err = PipelineConfig::from_toml_str("[fanout]\nconcurrency_limit = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[parallel]\nworker_count = 6").unwrap();

        let config = PipelineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.parallel.worker_count, 6);

        let missing = PipelineConfig::from_path(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PLOTFLOW_CONCURRENCY", "7"),
            ("PLOTFLOW_WORKERS", " 4 "),
            ("PLOTFLOW_VERBOSITY", "2"),
        ]
        .into_iter()
        .collect();

        let config = PipelineConfig::default()
            .apply_env_from(|var| env.get(var).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.fanout.concurrency_limit, 7);
        assert_eq!(config.parallel.worker_count, 4);
        assert_eq!(config.parallel.task_timeout_secs, 120);
        assert_eq!(config.logging.verbosity, 2);
    }

    #[test]
    fn test_invalid_env_value() {
        let err = PipelineConfig::default()
            .apply_env_from(|var| (var == "PLOTFLOW_TASK_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env { ref var, ref value } if var == "PLOTFLOW_TASK_TIMEOUT_SECS" && value == "soon"
        ));
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        let mut config = PipelineConfig::default();
        config.fanout.concurrency_limit = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.parallel.worker_count = 0;
        assert!(config.validate().is_err());

        let config = PipelineConfig::default()
            .with_gate("world_validation", GatePolicy::new("world_validation"));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = PipelineConfig::load(None).unwrap();
        assert!(config.fanout.concurrency_limit >= 1);
    }
}
