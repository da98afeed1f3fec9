//! Configuration management for slidewin.

use serde::{Deserialize, Serialize};

use crate::error::{Result, WindowError};
use crate::window::{RateLimiter, RollingWindow, ZeroBudgetPolicy};

/// Environment variable prefix, e.g. `SLIDEWIN__WINDOW__NUM_BUCKETS=20`.
const ENV_PREFIX: &str = "SLIDEWIN";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlidewinConfig {
    /// Window timing
    #[serde(default)]
    pub window: WindowConfig,

    /// Rate limiter settings
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rolling window timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window size in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Number of buckets the window is split into
    #[serde(default = "default_num_buckets")]
    pub num_buckets: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            num_buckets: default_num_buckets(),
        }
    }
}

impl WindowConfig {
    /// Build a stopped window with these parameters.
    pub fn build(&self) -> RollingWindow {
        RollingWindow::new(self.window_ms, self.num_buckets)
    }
}

fn default_window_ms() -> u64 {
    1000
}

fn default_num_buckets() -> usize {
    10
}

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Admission budget for the whole window
    #[serde(default = "default_concurrency")]
    pub concurrency: i32,

    /// Behavior when the per-bucket budget truncates to zero
    #[serde(default)]
    pub zero_budget: ZeroBudgetPolicy,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            zero_budget: ZeroBudgetPolicy::default(),
        }
    }
}

impl LimiterConfig {
    pub fn build(&self) -> RateLimiter {
        RateLimiter::with_policy(self.concurrency, self.zero_budget)
    }
}

fn default_concurrency() -> i32 {
    100
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl SlidewinConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| WindowError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from an optional YAML file, overlaid with
    /// `SLIDEWIN__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::with_name(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
