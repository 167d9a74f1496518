// Configuration management for repograph

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resilience::{BreakerConfig, RetryConfig};

/// Name of the per-directory configuration file
pub const CONFIG_FILE_NAME: &str = ".repograph.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub indexing: IndexingConfig,
    pub storage: StorageConfig,
    pub retry: RetrySettings,
    pub circuit_breaker: BreakerSettings,
    pub jobs: JobsConfig,
    pub embeddings: EmbeddingsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Extra exclude patterns on top of the built-in directory deny-list
    pub exclude: Vec<String>,
    pub max_file_size: u64,
    pub workers: usize,
    pub embed_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Checkout directory for remote repositories
    pub workdir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub monitor_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Finished jobs kept for polling before the oldest are pruned
    pub max_retained: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// "none" or "ollama"
    pub provider: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Accept local directories and `file://` URLs as `repoUrl` over HTTP
    pub allow_local_paths: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude: vec!["*.min.js".to_string(), "**/__generated__/**".to_string()],
            max_file_size: crate::indexer::collector::MAX_FILE_SIZE,
            workers: 4,
            embed_batch_size: 32,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: ".repograph/graph.db".to_string(),
            workdir: ".repograph/repos".to_string(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            monitor_window_ms: 120_000,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { max_retained: 200 }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            base_url: crate::remote::embeddings::DEFAULT_BASE_URL.to_string(),
            model: crate::remote::embeddings::DEFAULT_MODEL.to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            allow_local_paths: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        RetryConfig {
            max_retries: s.max_retries,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter: s.jitter,
        }
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(s: &BreakerSettings) -> Self {
        BreakerConfig {
            failure_threshold: s.failure_threshold,
            reset_timeout: Duration::from_millis(s.reset_timeout_ms),
            monitor_window: Duration::from_millis(s.monitor_window_ms),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory.
    /// Looks for .repograph.toml and falls back to defaults.
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let config_path = project_dir.as_ref().join(CONFIG_FILE_NAME);

        match Self::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::debug!("Could not load config from {}: {}", config_path.display(), e);
                tracing::info!("Using default configuration");
                Self::default()
            }
        }
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.db_path)
    }

    pub fn workdir(&self) -> PathBuf {
        PathBuf::from(&self.storage.workdir)
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.indexing.workers == 0 {
            return Err(anyhow::anyhow!("Worker count must be greater than 0"));
        }
        if self.indexing.max_file_size == 0 {
            return Err(anyhow::anyhow!("Max file size must be greater than 0"));
        }
        if self.indexing.embed_batch_size == 0 {
            return Err(anyhow::anyhow!("Embedding batch size must be greater than 0"));
        }

        if self.storage.db_path.is_empty() {
            return Err(anyhow::anyhow!("Database path cannot be empty"));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(anyhow::anyhow!("Retry base delay cannot exceed max delay"));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(anyhow::anyhow!("Circuit breaker threshold must be greater than 0"));
        }
        if self.circuit_breaker.monitor_window_ms == 0 {
            return Err(anyhow::anyhow!("Circuit breaker monitor window must be greater than 0"));
        }

        let valid_providers = ["none", "ollama"];
        if !valid_providers.contains(&self.embeddings.provider.as_str()) {
            return Err(anyhow::anyhow!("Invalid embeddings provider: {}", self.embeddings.provider));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level));
        }
        let valid_formats = ["compact", "pretty", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!("Invalid log format: {}", self.logging.format));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be greater than 0"));
        }

        Ok(())
    }
}
