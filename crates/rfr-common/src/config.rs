//! ---
//! rfr_section: "01-core-functionality"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Application configuration model and loader."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_endpoint() -> String {
    "https://management.azure.com".to_owned()
}

fn default_api_version() -> String {
    "2019-09-01".to_owned()
}

fn default_token_env() -> String {
    "ARM_ACCESS_TOKEN".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_resources_must_be_imported() -> bool {
    true
}

fn default_create_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_update_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_delete_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(5_000)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

/// Primary configuration object for the lifecycle runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "RFR_CONFIG";

    /// Load configuration from disk, respecting the `RFR_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        let override_path = std::env::var_os(Self::ENV_CONFIG_PATH).map(PathBuf::from);
        Self::resolve(override_path, candidates)
    }

    /// Load from `override_path` when given and non-empty, else from the first existing candidate.
    pub fn resolve<P: AsRef<Path>>(
        override_path: Option<PathBuf>,
        candidates: &[P],
    ) -> Result<LoadedAppConfig> {
        if let Some(path) = override_path.filter(|path| !path.as_os_str().is_empty()) {
            let config = Self::from_path(path.clone())?;
            return Ok(LoadedAppConfig {
                config,
                source: path,
            });
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.provider.validate()?;
        self.timeouts.validate()?;
        if self.polling.interval.is_zero() {
            return Err(anyhow!("polling.interval must be greater than zero"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Connection settings for the remote control plane.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            endpoint: default_endpoint(),
            api_version: default_api_version(),
            token_env: default_token_env(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subscription_id.trim().is_empty() {
            return Err(anyhow!("provider.subscription_id must not be empty"));
        }
        if self.api_version.trim().is_empty() {
            return Err(anyhow!("provider.api_version must not be empty"));
        }
        let url = Url::parse(&self.endpoint)
            .with_context(|| format!("provider.endpoint {} is not a valid url", self.endpoint))?;
        if url.cannot_be_a_base() {
            return Err(anyhow!(
                "provider.endpoint {} cannot be used as a base url",
                self.endpoint
            ));
        }
        Ok(())
    }

    /// Endpoint without a trailing slash, ready for path concatenation.
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }
}

/// Behaviour switches for the lifecycle controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Refuse to create a rule that already exists remotely; it must be imported instead.
    #[serde(default = "default_resources_must_be_imported")]
    pub resources_must_be_imported: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            resources_must_be_imported: default_resources_must_be_imported(),
        }
    }
}

/// Per-verb deadlines applied to each controller invocation.
#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    #[serde(default = "default_create_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub create: Duration,
    #[serde(default = "default_read_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub read: Duration,
    #[serde(default = "default_update_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub update: Duration,
    #[serde(default = "default_delete_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub delete: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            create: default_create_timeout(),
            read: default_read_timeout(),
            update: default_update_timeout(),
            delete: default_delete_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("create", self.create),
            ("read", self.read),
            ("update", self.update),
            ("delete", self.delete),
        ] {
            if value.is_zero() {
                return Err(anyhow!("timeouts.{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}
