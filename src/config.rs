//! Worker configuration
//!
//! Serde schema for `config/sharepack.yaml`. Every section has defaults, so
//! a missing file yields a runnable configuration. Secrets never live in the
//! file: it names the environment variables holding them.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use sharepack_core::ConsumerConfig;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "SHAREPACK_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config/sharepack.yaml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProvisionerConfig {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub platform: PlatformSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseSection {
    /// Variable holding the connection string
    #[serde(default = "default_database_url_env")]
    pub url_env: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url_env: default_database_url_env(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_cooldown_secs")]
    pub retry_cooldown_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_dequeue_count")]
    pub max_dequeue_count: u32,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_cooldown_secs: default_retry_cooldown_secs(),
            max_retries: default_max_retries(),
            max_dequeue_count: default_max_dequeue_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlatformSection {
    /// Variable holding the bearer token for the management API
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_database_url_env() -> String {
    "DATABASE_URL".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_retry_cooldown_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    1
}

fn default_max_dequeue_count() -> u32 {
    5
}

fn default_token_env() -> String {
    "SHAREPACK_PLATFORM_TOKEN".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ProvisionerConfig {
    /// Load from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load the file named by `SHAREPACK_CONFIG` (or the default path),
    /// falling back to defaults when it does not exist.
    pub fn from_env() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_or_default(path)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn database_url(&self) -> Result<String> {
        std::env::var(&self.database.url_env)
            .with_context(|| format!("{} must be set", self.database.url_env))
    }

    pub fn platform_token(&self) -> Result<String> {
        std::env::var(&self.platform.token_env)
            .with_context(|| format!("{} must be set", self.platform.token_env))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.platform.request_timeout_secs)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        let q = &self.queue;
        ConsumerConfig {
            visibility_timeout: Duration::from_secs(q.visibility_timeout_secs),
            poll_interval: Duration::from_millis(q.poll_interval_ms),
            retry_cooldown: Duration::from_secs(q.retry_cooldown_secs),
            max_retries: q.max_retries,
            max_dequeue_count: q.max_dequeue_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_consumer_defaults() {
        let config = ProvisionerConfig::default();
        assert_eq!(config.consumer_config(), ConsumerConfig::default());
        assert_eq!(config.database.url_env, "DATABASE_URL");
        assert_eq!(config.platform.token_env, "SHAREPACK_PLATFORM_TOKEN");
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = ProvisionerConfig::from_yaml(
            r#"
queue:
  retry_cooldown_secs: 5
platform:
  request_timeout_secs: 10
"#,
        )
        .unwrap();
        assert_eq!(config.queue.retry_cooldown_secs, 5);
        assert_eq!(config.queue.visibility_timeout_secs, 300);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.database, DatabaseSection::default());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database:\n  max_connections: 12").unwrap();

        let config = ProvisionerConfig::load(file.path()).unwrap();
        assert_eq!(config.database.max_connections, 12);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProvisionerConfig::load_or_default(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, ProvisionerConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "queue: [not, a, map]").unwrap();
        assert!(ProvisionerConfig::load(file.path()).is_err());
    }
}
