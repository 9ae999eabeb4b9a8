use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::baremetal::retry::RetryConfig;
use crate::baremetal::types::ApiVersion;

/// Main configuration structure for the bare metal client
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BaremetalConfig {
    /// Service endpoint and credentials
    pub endpoint: EndpointConfig,
    /// Provisioning wait behavior
    pub provision: ProvisionConfig,
    /// Retry policy for idempotent requests
    pub retry: RetryConfig,
    /// Client side request rate limiting
    pub rate_limit: RateLimitConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Base URL of the bare metal API, without the `/v1` suffix
    pub url: String,
    /// Auth token sent as `X-Auth-Token` (can be set via env var)
    pub token: Option<String>,
    /// Default API microversion
    pub api_version: String,
    /// Per-request timeout
    pub request_timeout_seconds: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6385".to_string(),
            token: None,
            api_version: "1.46".to_string(),
            request_timeout_seconds: 60,
        }
    }
}

impl EndpointConfig {
    pub fn api_version(&self) -> Result<ApiVersion, crate::baremetal::BaremetalError> {
        self.api_version.parse()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisionConfig {
    /// Delay between two polls of a node
    pub poll_interval_ms: u64,
    /// Random extra delay added to each poll, as a fraction of the interval
    pub jitter_ratio: f64,
    /// Wait timeout used when the caller does not pass one
    pub default_timeout_seconds: u64,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            jitter_ratio: 0.25,
            // deploy callback timeout of the service
            default_timeout_seconds: 1800,
        }
    }
}

impl ProvisionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second
    pub requests_per_second: u32,
    /// Burst capacity
    pub burst_capacity: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_capacity: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON formatted logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl BaremetalConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (baremetal.toml, .baremetal-rc)
    /// 3. Environment variables (prefixed with BAREMETAL__)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`BaremetalConfig::load`] with configuration files looked up in `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&BaremetalConfig::default())?);

        let toml_path = dir.join("baremetal.toml");
        if toml_path.exists() {
            builder = builder.add_source(File::from(toml_path));
        }

        let rc_path = dir.join(".baremetal-rc");
        if rc_path.exists() {
            builder = builder.add_source(File::from(rc_path).format(config::FileFormat::Toml));
        }

        // Override with environment variables, e.g. BAREMETAL__ENDPOINT__URL
        builder = builder.add_source(
            Environment::with_prefix("BAREMETAL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut baremetal_config: BaremetalConfig = builder.build()?.try_deserialize()?;

        // Special handling for the token - check the conventional variables too
        if baremetal_config.endpoint.token.is_none() {
            if let Ok(token) = std::env::var("BAREMETAL_TOKEN") {
                baremetal_config.endpoint.token = Some(token);
            } else if let Ok(token) = std::env::var("OS_AUTH_TOKEN") {
                baremetal_config.endpoint.token = Some(token);
            }
        }

        baremetal_config.validate()?;
        Ok(baremetal_config)
    }

    /// Reject values that would make the client unusable
    pub fn validate(&self) -> Result<()> {
        self.endpoint.api_version()?;
        if !(0.0..=1.0).contains(&self.provision.jitter_ratio) {
            anyhow::bail!(
                "provision.jitter_ratio must be between 0 and 1, got {}",
                self.provision.jitter_ratio
            );
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<BaremetalConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // .env values must be in the environment before the sources are read
        BaremetalConfig::load_env_file().and_then(|()| BaremetalConfig::load())
    });

/// Get the global configuration
pub fn config() -> Result<&'static BaremetalConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}
