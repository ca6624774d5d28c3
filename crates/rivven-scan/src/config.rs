//! Scanner configuration
//!
//! Loaded from YAML with `${VAR}` / `${VAR:-default}` environment expansion:
//!
//! ```yaml
//! credentials_path: /etc/rivven/jdbc-user-password.json
//! watermark_dir: ${WATERMARK_DIR:-/var/lib/rivven/watermarks}
//! max_concurrent_scans: 8
//! retry:
//!   max_retries: 5
//!   initial_delay_ms: 500
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::info;
use validator::Validate;

use crate::credentials::{CredentialStore, SharedCredentialStore};
use crate::error::{Error, Result};
use crate::introspect::Timeouts;
use crate::retry::RetryConfig;
use crate::watermark::{FileWatermarkStore, MemoryWatermarkStore, WatermarkStore};

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ScannerConfig {
    /// Path of the `jdbc-user-password.json` credential catalog
    #[validate(length(min = 1))]
    pub credentials_path: String,

    /// Directory for the file watermark store; in-memory when absent
    #[serde(default)]
    pub watermark_dir: Option<PathBuf>,

    /// Per-attempt connect timeout
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1))]
    pub connect_timeout_ms: u64,

    /// Per-attempt describe timeout
    #[serde(default = "default_describe_timeout_ms")]
    #[validate(range(min = 1))]
    pub describe_timeout_ms: u64,

    /// Tables scanned at once
    #[serde(default = "default_max_concurrent_scans")]
    #[validate(range(min = 1, max = 256))]
    pub max_concurrent_scans: usize,

    /// Rows per sink batch
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub batch_size: usize,

    /// Backoff for connect and describe
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryPolicyConfig,
}

/// Retry section of [`ScannerConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RetryPolicyConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 100))]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor between retries
    #[serde(default = "default_backoff_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub backoff_multiplier: f64,

    /// Jitter as a fraction of the delay
    #[serde(default = "default_jitter")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: default_jitter(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_describe_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_scans() -> usize {
    4
}

fn default_batch_size() -> usize {
    1_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

impl ScannerConfig {
    /// Parse YAML (after environment expansion) and validate
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = Self::expand_env_vars(content);

        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::config(format!("failed to parse scanner config: {}", e)))?;

        config.check()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }

    /// Run field validation plus cross-field checks
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid scanner config: {}", e)))?;

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(Error::config(format!(
                "invalid scanner config: retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Retry policy for connect and describe
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_retries(self.retry.max_retries)
            .with_initial_delay(Duration::from_millis(self.retry.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry.max_delay_ms))
            .with_backoff_multiplier(self.retry.backoff_multiplier)
            .with_jitter(self.retry.jitter)
    }

    /// Connect and describe timeouts
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            describe: Duration::from_millis(self.describe_timeout_ms),
        }
    }

    /// Open the configured watermark store
    pub async fn watermark_store(&self) -> Result<Arc<dyn WatermarkStore>> {
        match &self.watermark_dir {
            Some(dir) => {
                let store = FileWatermarkStore::new(dir.clone()).await?;
                info!(dir = %dir.display(), "Using file watermark store");
                Ok(Arc::new(store))
            }
            None => {
                info!("Using in-memory watermark store");
                Ok(Arc::new(MemoryWatermarkStore::new()))
            }
        }
    }

    /// Load the credential catalog
    pub async fn load_credentials(&self) -> Result<SharedCredentialStore> {
        let store = CredentialStore::from_file(&self.credentials_path).await?;
        Ok(SharedCredentialStore::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScannerConfig::from_yaml_str("credentials_path: creds.json").unwrap();
        assert_eq!(config.max_concurrent_scans, 4);
        assert_eq!(config.batch_size, 1_000);
        assert!(config.watermark_dir.is_none());
        assert_eq!(config.retry, RetryPolicyConfig::default());
        assert_eq!(config.timeouts(), Timeouts::default());
    }

    #[test]
    fn test_env_expansion_with_default() {
        let yaml = "credentials_path: ${RIVVEN_SCAN_TEST_UNSET_VAR:-/etc/creds.json}\n";
        let config = ScannerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.credentials_path, "/etc/creds.json");
    }

    #[test]
    fn test_retry_config_conversion() {
        let yaml = r#"
credentials_path: creds.json
retry:
  max_retries: 5
  initial_delay_ms: 50
  max_delay_ms: 1000
  backoff_multiplier: 3.0
  jitter: 0.0
"#;
        let config = ScannerConfig::from_yaml_str(yaml).unwrap();
        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(50));
        assert_eq!(retry.max_delay, Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(150));
    }

    #[test]
    fn test_validation_errors() {
        for yaml in [
            "credentials_path: ''",
            "credentials_path: c.json\nmax_concurrent_scans: 0",
            "credentials_path: c.json\nretry:\n  jitter: 1.5",
            "credentials_path: c.json\nretry:\n  initial_delay_ms: 5000\n  max_delay_ms: 100",
        ] {
            let err = ScannerConfig::from_yaml_str(yaml).unwrap_err();
            assert!(matches!(err, Error::Configuration { .. }), "{yaml}: {err:?}");
        }
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            ScannerConfig::from_yaml_str("credentials_path: [unclosed"),
            Err(Error::Configuration { .. })
        ));
    }
}
