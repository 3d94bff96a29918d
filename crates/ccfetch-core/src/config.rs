//! Configuration for ccfetch
//!
//! Four sections, each optional in the source file:
//! - `planner`: range merging and whole-file thresholds
//! - `store`: which archive host to read from and how
//! - `retry`: backoff for transient fetch failures
//! - `pipeline`: worker count and request pacing

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure for ccfetch
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CcfetchConfig {
    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl CcfetchConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. Config file specified by CCFETCH_CONFIG env var
    /// 3. ./config/ccfetch.{toml,yaml,json}
    /// 4. Hardcoded defaults (lowest priority)
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Ok(config_path) = std::env::var("CCFETCH_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(File::with_name("./config/ccfetch").required(false));

        // Example: CCFETCH_RETRY__MAX_ATTEMPTS=3
        builder = builder.add_source(
            Environment::with_prefix("CCFETCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: CcfetchConfig = builder.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: CcfetchConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.planner.validate()?;
        self.retry.validate()?;
        self.store.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}

/// Range merging and full-download policy.
///
/// None of these defaults are known to be optimal; they are tunable policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Gap (bytes) under which neighbouring records share one fetch window
    pub merge_threshold_bytes: u64,

    /// Coverage ratio above which the whole file is fetched (0 < R < 1)
    pub full_download_ratio: f64,

    /// More merged windows than this also triggers a whole-file fetch
    pub max_ranges_per_file: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            merge_threshold_bytes: 1024 * 1024, // 1 MiB
            full_download_ratio: 0.5,
            max_ranges_per_file: 20,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.full_download_ratio > 0.0 && self.full_download_ratio < 1.0) {
            return Err(ConfigError::Message(format!(
                "planner.full_download_ratio must be in (0, 1), got {}",
                self.full_download_ratio
            )));
        }

        if self.max_ranges_per_file == 0 {
            return Err(ConfigError::Message(
                "planner.max_ranges_per_file must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Which remote store implementation to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// HTTPS range requests against `base_url`
    Http,
    /// S3 GetObject with `Range` against `bucket`
    S3,
    /// Files below `local_root`
    Local,
}

/// Remote object store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Base URL archive filenames are resolved against (Http backend)
    pub base_url: String,

    /// Bucket holding the archive (S3 backend)
    pub bucket: String,

    /// AWS region (S3 backend)
    pub region: String,

    /// Custom S3-compatible endpoint
    pub endpoint: Option<String>,

    /// Optional static credentials; environment credentials are used otherwise
    pub access_key: Option<String>,
    pub secret_key: Option<String>,

    /// Root directory (Local backend)
    pub local_root: Option<PathBuf>,

    /// Whole-request timeout in milliseconds
    pub timeout_ms: u64,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    pub user_agent: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Http,
            base_url: "https://data.commoncrawl.org/".to_string(),
            bucket: "commoncrawl".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            local_root: None,
            timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
            user_agent: concat!("ccfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            StoreBackend::Http if self.base_url.is_empty() => {
                return Err(ConfigError::Message(
                    "store.base_url must be set for the http backend".to_string(),
                ));
            }
            StoreBackend::S3 if self.bucket.is_empty() => {
                return Err(ConfigError::Message(
                    "store.bucket must be set for the s3 backend".to_string(),
                ));
            }
            StoreBackend::Local if self.local_root.is_none() => {
                return Err(ConfigError::Message(
                    "store.local_root must be set for the local backend".to_string(),
                ));
            }
            _ => {}
        }

        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(ConfigError::Message(
                "store.access_key and store.secret_key must be set together".to_string(),
            ));
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "store.timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Retry configuration for fetch attempts
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per plan, first try included
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Random extra delay as a fraction of the backoff (0.0 - 1.0)
    pub jitter_percent: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            backoff_multiplier: 2.0,
            jitter_percent: 0.2,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Message(
                "retry.max_attempts must be > 0".to_string(),
            ));
        }

        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Message(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.jitter_percent) {
            return Err(ConfigError::Message(
                "retry.jitter_percent must be within 0.0 - 1.0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get initial backoff duration
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Get maximum backoff duration
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Calculate backoff delay (before jitter) for a given retry, 0-based
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Plans fetched concurrently; keep small for shared rate-limited endpoints
    pub max_concurrency: usize,

    /// Minimum spacing between request starts across all workers
    pub politeness_delay_ms: u64,

    /// Ask the store for real archive sizes instead of estimating them
    pub probe_file_sizes: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            politeness_delay_ms: 0,
            probe_file_sizes: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Message(
                "pipeline.max_concurrency must be > 0".to_string(),
            ));
        }

        if self.max_concurrency > 64 {
            return Err(ConfigError::Message(
                "pipeline.max_concurrency too high (max: 64)".to_string(),
            ));
        }

        Ok(())
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_millis(self.politeness_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_configuration() {
        let config = CcfetchConfig::default();

        assert_eq!(config.planner.merge_threshold_bytes, 1024 * 1024);
        assert_eq!(config.planner.full_download_ratio, 0.5);
        assert_eq!(config.planner.max_ranges_per_file, 20);

        assert_eq!(config.store.backend, StoreBackend::Http);
        assert_eq!(config.store.base_url, "https://data.commoncrawl.org/");
        assert_eq!(config.store.bucket, "commoncrawl");

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.pipeline.max_concurrency, 4);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_config_backoff() {
        let retry = RetryConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            ..Default::default()
        };

        assert_eq!(retry.backoff_for_attempt(0).as_millis(), 100);
        assert_eq!(retry.backoff_for_attempt(1).as_millis(), 200);
        assert_eq!(retry.backoff_for_attempt(2).as_millis(), 400);

        // Max backoff cap
        assert_eq!(retry.backoff_for_attempt(20).as_millis(), 5000);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = CcfetchConfig::default();

        config.planner.full_download_ratio = 1.0;
        assert!(config.validate().is_err());
        config.planner.full_download_ratio = 0.0;
        assert!(config.validate().is_err());
        config.planner.full_download_ratio = 0.75;
        assert!(config.validate().is_ok());

        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
        config.retry.max_attempts = 3;

        config.pipeline.max_concurrency = 0;
        assert!(config.validate().is_err());
        config.pipeline.max_concurrency = 2;

        config.store.access_key = Some("AKIA".to_string());
        assert!(config.validate().is_err());
        config.store.secret_key = Some("secret".to_string());
        assert!(config.validate().is_ok());

        config.store.backend = StoreBackend::Local;
        assert!(config.validate().is_err());
        config.store.local_root = Some(PathBuf::from("/tmp/warc"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[planner]\nmerge_threshold_bytes = 4096\n\n[retry]\nmax_attempts = 3\n"
        )
        .unwrap();

        let config = CcfetchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.planner.merge_threshold_bytes, 4096);
        assert_eq!(config.planner.full_download_ratio, 0.5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert_eq!(config.pipeline.max_concurrency, 4);
    }
}
