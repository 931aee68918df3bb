//! Engine configuration
//!
//! Compliance thresholds have no built-in defaults: a deployment must state
//! them explicitly, either in a TOML file or through the environment. Feed
//! settings fall back to the values the sensor service is operated with.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading/validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Load-plausibility limits used by the classifier and the completion check
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplianceThresholds {
    /// Entry volume below this fraction of the body volume is suspicious
    pub min_entry_volume_ratio: f64,
    /// Largest exit reading (m³) still treated as an empty body
    pub exit_volume_tolerance: f64,
}

impl ComplianceThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.min_entry_volume_ratio;
        if !ratio.is_finite() || ratio <= 0.0 || ratio > 1.0 {
            return Err(ConfigError::Invalid {
                key: "min_entry_volume_ratio",
                message: format!("{} is outside (0, 1]", ratio),
            });
        }
        let tolerance = self.exit_volume_tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::Invalid {
                key: "exit_volume_tolerance",
                message: format!("{} must be a non-negative number", tolerance),
            });
        }
        Ok(())
    }
}

/// Plate-recognition / volume feed connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Base URL of the sensor service; empty disables the feed
    pub base_url: String,
    /// Sent as `X-Internal-Token` when non-empty
    pub internal_token: String,
    pub request_timeout_secs: u64,
    /// Total attempts per query, first one included
    pub max_attempts: u32,
    /// Linear backoff step: the n-th retry waits n × step
    pub backoff_step_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            internal_token: String::new(),
            request_timeout_secs: 30,
            max_attempts: 3,
            backoff_step_ms: 500,
        }
    }
}

impl FeedConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }
}

/// Upper bound for `area_window_secs`: one day.
pub const MAX_AREA_WINDOW_SECS: i64 = 86_400;
/// Upper bound for `feed.backoff_step_ms`: one minute.
pub const MAX_BACKOFF_STEP_MS: u64 = 60_000;

fn default_area_window_secs() -> i64 {
    600
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub thresholds: ComplianceThresholds,
    #[serde(default)]
    pub feed: FeedConfig,
    /// Half-width of the window around entry in which a GPS fix outside the
    /// cleaning area counts as missing area work
    #[serde(default = "default_area_window_secs")]
    pub area_window_secs: i64,
}

impl EngineConfig {
    /// Build from explicit thresholds with default feed settings.
    pub fn new(thresholds: ComplianceThresholds) -> Self {
        Self {
            thresholds,
            feed: FeedConfig::default(),
            area_window_secs: default_area_window_secs(),
        }
    }

    /// Parse a TOML document, then validate it.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Build entirely from the environment.
    ///
    /// `SNOWOPS_MIN_ENTRY_VOLUME_RATIO` and `SNOWOPS_EXIT_VOLUME_TOLERANCE`
    /// are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let thresholds = ComplianceThresholds {
            min_entry_volume_ratio: required_env("SNOWOPS_MIN_ENTRY_VOLUME_RATIO")?,
            exit_volume_tolerance: required_env("SNOWOPS_EXIT_VOLUME_TOLERANCE")?,
        };
        let mut config = Self::new(thresholds);
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay any `SNOWOPS_*` variables present in the environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = optional_env("SNOWOPS_MIN_ENTRY_VOLUME_RATIO")? {
            self.thresholds.min_entry_volume_ratio = v;
        }
        if let Some(v) = optional_env("SNOWOPS_EXIT_VOLUME_TOLERANCE")? {
            self.thresholds.exit_volume_tolerance = v;
        }
        if let Ok(url) = std::env::var("SNOWOPS_FEED_URL") {
            self.feed.base_url = url;
        }
        if let Ok(token) = std::env::var("SNOWOPS_FEED_TOKEN") {
            self.feed.internal_token = token;
        }
        if let Some(v) = optional_env("SNOWOPS_FEED_TIMEOUT_SECS")? {
            self.feed.request_timeout_secs = v;
        }
        if let Some(v) = optional_env("SNOWOPS_FEED_MAX_ATTEMPTS")? {
            self.feed.max_attempts = v;
        }
        if let Some(v) = optional_env("SNOWOPS_FEED_BACKOFF_MS")? {
            self.feed.backoff_step_ms = v;
        }
        if let Some(v) = optional_env("SNOWOPS_AREA_WINDOW_SECS")? {
            self.area_window_secs = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        if self.feed.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "feed.max_attempts",
                message: "at least one attempt is required".to_string(),
            });
        }
        if self.feed.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "feed.request_timeout_secs",
                message: "timeout must be positive".to_string(),
            });
        }
        if self.feed.backoff_step_ms > MAX_BACKOFF_STEP_MS {
            return Err(ConfigError::Invalid {
                key: "feed.backoff_step_ms",
                message: format!("step must not exceed {} ms", MAX_BACKOFF_STEP_MS),
            });
        }
        if !(0..=MAX_AREA_WINDOW_SECS).contains(&self.area_window_secs) {
            return Err(ConfigError::Invalid {
                key: "area_window_secs",
                message: format!("window must be within 0..={} seconds", MAX_AREA_WINDOW_SECS),
            });
        }
        Ok(())
    }

    /// Area window, clamped to `0..=MAX_AREA_WINDOW_SECS` for configs built
    /// without validation.
    pub fn area_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.area_window_secs.clamp(0, MAX_AREA_WINDOW_SECS))
    }
}

fn required_env<T: std::str::FromStr>(key: &'static str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    optional_env(key)?.ok_or(ConfigError::Missing(key))
}

fn optional_env<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
