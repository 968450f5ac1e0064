use crate::constants;
use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extraction: ExtractionConfig,
    pub worker: WorkerConfig,
    pub store: StoreConfig,
}

/// Upstream text-generation service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    /// Bounds one extraction call including every rate-limit retry
    pub task_timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: constants::DEFAULT_COMPLETIONS_ENDPOINT.to_string(),
            model: constants::DEFAULT_MODEL.to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            api_key_env: "EXTRACTION_API_KEY".to_string(),
            request_timeout_secs: 60,
            task_timeout_secs: 300,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_total_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            max_total_wait_ms: 180_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub sqlite_path: Option<PathBuf>,
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.extraction.retry.max_attempts == 0 {
            return Err(IngestError::Config(
                "extraction.retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(IngestError::Config(
                "worker.concurrency must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.extraction.temperature) {
            return Err(IngestError::Config(format!(
                "extraction.temperature {} is outside 0.0..=2.0",
                self.extraction.temperature
            )));
        }
        Ok(())
    }
}

impl ExtractionConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).map_err(|_| {
            IngestError::Config(format!(
                "environment variable {} is not set",
                self.api_key_env
            ))
        })
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.extraction.retry.max_attempts, 5);
        assert_eq!(config.extraction.retry.base_delay_ms, 5_000);
        assert!((config.extraction.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.worker.concurrency, 4);
        assert!(config.store.sqlite_path.is_none());
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_toml_str(
            r#"
            [extraction]
            model = "small-model"
            [extraction.retry]
            max_attempts = 2
            [store]
            sqlite_path = "data/events.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.extraction.model, "small-model");
        assert_eq!(config.extraction.retry.max_attempts, 2);
        assert_eq!(config.extraction.retry.max_delay_ms, 60_000);
        assert_eq!(
            config.store.sqlite_path.as_deref(),
            Some(Path::new("data/events.db"))
        );
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = Config::from_toml_str("[extraction.retry]\nmax_attempts = 0").unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[worker]\nconcurrency = 8").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.worker.concurrency, 8);

        let missing = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(missing.worker.concurrency, 4);
    }
}
