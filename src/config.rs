//! Configuration loaded from `taskhook.toml`.
//!
//! Every field has a default, so an absent file or a partial one is fine.
//! `TASKHOOK_BIND` and `TASKHOOK_MAX_ITERATIONS` take precedence over the file;
//! command line flags are applied on top by the binary.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::dispatcher::RetryConfig;
use crate::error::TaskhookError;
use crate::executor::ExecutorSettings;

pub const DEFAULT_CONFIG_PATH: &str = "taskhook.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskhookConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
}

/// Outbound webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Attempts per endpoint, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Forget a task's registrations once its notification went out.
    #[serde(default = "default_clear_after_dispatch")]
    pub clear_after_dispatch: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    /// Duration of the built-in simulated extraction.
    #[serde(default = "default_simulated_work_ms")]
    pub simulated_work_ms: u64,

    /// Fail tasks whose work runs longer than this. Unset means no limit.
    #[serde(default)]
    pub work_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8011))
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_clear_after_dispatch() -> bool {
    true
}

fn default_simulated_work_ms() -> u64 {
    10_000
}

fn default_max_iterations() -> u32 {
    3
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
            clear_after_dispatch: default_clear_after_dispatch(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            simulated_work_ms: default_simulated_work_ms(),
            work_timeout_secs: None,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ExecutorConfig {
    pub fn simulated_work(&self) -> Duration {
        Duration::from_millis(self.simulated_work_ms)
    }
}

impl TaskhookConfig {
    /// Load `path`, falling back to defaults when the file does not exist,
    /// then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str::<TaskhookConfig>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `TASKHOOK_*` overrides read through `lookup`. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bind) = lookup("TASKHOOK_BIND").filter(|v| !v.is_empty()) {
            self.server.bind = bind
                .parse()
                .with_context(|| format!("TASKHOOK_BIND is not a socket address: {bind}"))?;
        }
        if let Some(max) = lookup("TASKHOOK_MAX_ITERATIONS").filter(|v| !v.is_empty()) {
            self.validation.max_iterations = max
                .parse()
                .with_context(|| format!("TASKHOOK_MAX_ITERATIONS is not a number: {max}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.validation.max_iterations == 0 {
            return Err(TaskhookError::Config(
                "validation.max_iterations must be a positive integer".to_string(),
            ));
        }
        if self.delivery.max_attempts == 0 {
            return Err(TaskhookError::Config(
                "delivery.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            work_timeout: self.executor.work_timeout_secs.map(Duration::from_secs),
            clear_after_dispatch: self.delivery.clear_after_dispatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn default_config_values() {
        let config = TaskhookConfig::default();
        assert_eq!(config.server.bind.to_string(), "0.0.0.0:8011");
        assert_eq!(config.delivery.retry(), RetryConfig::default());
        assert_eq!(config.delivery.timeout(), Duration::from_secs(30));
        assert!(config.delivery.clear_after_dispatch);
        assert_eq!(config.executor.simulated_work(), Duration::from_secs(10));
        assert!(config.executor.work_timeout_secs.is_none());
        assert_eq!(config.validation.max_iterations, 3);
        config.validate().unwrap();
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            [delivery]
            max_attempts = 5
            clear_after_dispatch = false

            [executor]
            work_timeout_secs = 60
        "#;
        let config: TaskhookConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.delivery.max_attempts, 5);
        assert_eq!(config.delivery.base_delay_ms, 500);
        assert_eq!(config.executor.simulated_work_ms, 10_000);

        let settings = config.executor_settings();
        assert_eq!(settings.work_timeout, Some(Duration::from_secs(60)));
        assert!(!settings.clear_after_dispatch);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind = \"127.0.0.1:9100\"\n\n[validation]\nmax_iterations = 5").unwrap();

        let config = TaskhookConfig::load(file.path()).unwrap();
        assert_eq!(config.server.bind.port(), 9100);
        assert_eq!(config.validation.max_iterations, 5);
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskhookConfig::load(&dir.path().join("taskhook.toml")).unwrap();
        assert_eq!(config.delivery.max_attempts, 3);
    }

    #[test]
    fn load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[validation]\nmax_iterations = \"many\"").unwrap();
        assert!(TaskhookConfig::load(file.path()).is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TASKHOOK_BIND", "127.0.0.1:7000"),
            ("TASKHOOK_MAX_ITERATIONS", "7"),
        ]);
        let mut config = TaskhookConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.bind.port(), 7000);
        assert_eq!(config.validation.max_iterations, 7);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut config = TaskhookConfig::default();
        let result = config.apply_env(|key| {
            (key == "TASKHOOK_MAX_ITERATIONS").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_zero_iterations_and_attempts() {
        let mut config = TaskhookConfig::default();
        config.validation.max_iterations = 0;
        assert!(matches!(config.validate(), Err(TaskhookError::Config(_))));

        let mut config = TaskhookConfig::default();
        config.delivery.max_attempts = 0;
        assert!(matches!(config.validate(), Err(TaskhookError::Config(_))));
    }
}
