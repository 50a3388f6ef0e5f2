//! Worker and module configuration
//!
//! Process settings come from the environment (after `.env` is loaded) and
//! can be overridden on the command line. Module settings live in one YAML
//! file per module under the config directory; a missing file means
//! defaults. A few secrets can be overridden from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use climate_durable::reliability::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Process configuration
// =============================================================================

/// Worker process configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Directory holding `<module>.state` checkpoints
    pub checkpoint_dir: PathBuf,
    /// Directory holding `<module>.yaml` module configs
    pub config_dir: PathBuf,
    /// Pause between cycles
    pub cycle_interval: Duration,
    /// Cancel runners still busy after this long
    pub cycle_time_limit: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("./state"),
            config_dir: PathBuf::from("./config"),
            cycle_interval: Duration::from_secs(60),
            cycle_time_limit: None,
        }
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `CHECKPOINT_DIR`: checkpoint directory (default: "./state")
    /// - `MODULE_CONFIG_DIR`: module config directory (default: "./config")
    /// - `CYCLE_INTERVAL_SECS`: seconds between cycles (default: 60)
    /// - `CYCLE_TIME_LIMIT_SECS`: optional per-cycle time limit
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let checkpoint_dir = std::env::var("CHECKPOINT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.checkpoint_dir);

        let config_dir = std::env::var("MODULE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.config_dir);

        let cycle_interval = std::env::var("CYCLE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.cycle_interval);

        let cycle_time_limit = std::env::var("CYCLE_TIME_LIMIT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs);

        Self {
            checkpoint_dir,
            config_dir,
            cycle_interval,
            cycle_time_limit,
        }
    }
}

/// Read `<dir>/<name>.yaml`, falling back to defaults when it does not exist
fn load_yaml<T>(dir: &Path, name: &str) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    let path = dir.join(format!("{name}.yaml"));
    match std::fs::read_to_string(&path) {
        Ok(raw) => {
            debug!(path = %path.display(), "loading module config");
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "module config not found, using defaults");
            Ok(T::default())
        }
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

// =============================================================================
// Historical weather collector
// =============================================================================

/// Historical weather backfill configuration
///
/// `base_url` is a template; `{TOKEN}`, `{DATE}`, `{LANG}` and `{LOC_ID}` are
/// substituted per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalWeatherConfig {
    pub tokens: Vec<String>,
    pub base_url: String,
    pub language: String,
    pub collection: String,
    pub locations_collection: String,
    pub max_requests_per_minute_per_token: u32,
    pub max_daily_requests_per_token: u32,
    /// Consecutive empty days that mark the history boundary
    pub max_day_count: u32,
    pub retention_window_days: i64,
    /// Source lag, in days, before a date can be queried
    pub tolerance_days: i64,
    pub update_frequency_fast: TimeDelta,
    pub update_frequency_slow: TimeDelta,
    /// Matched (already stored) records that end a location's backfill
    pub existing_data_limit: u64,
    pub request_timeout_secs: u64,
}

impl Default for HistoricalWeatherConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            base_url: "http://api.wunderground.com/api/{TOKEN}/history_{DATE}/lang:{LANG}/q/zmw:{LOC_ID}.json"
                .to_string(),
            language: "EN".to_string(),
            collection: "historical_weather".to_string(),
            locations_collection: "locations".to_string(),
            max_requests_per_minute_per_token: 10,
            max_daily_requests_per_token: 500,
            max_day_count: 10,
            retention_window_days: 2,
            tolerance_days: 2,
            update_frequency_fast: TimeDelta::minutes(1),
            update_frequency_slow: TimeDelta::days(1),
            existing_data_limit: 50,
            request_timeout_secs: 10,
        }
    }
}

impl HistoricalWeatherConfig {
    pub const MODULE: &'static str = "historical_weather";

    /// Load from `<dir>/historical_weather.yaml`, apply env overrides, validate
    ///
    /// Environment variables:
    /// - `HISTORICAL_WEATHER_TOKENS`: comma separated API tokens
    /// - `HISTORICAL_WEATHER_BASE_URL`: URL template
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_yaml(dir, Self::MODULE)?;
        let config = config.with_overrides(
            std::env::var("HISTORICAL_WEATHER_TOKENS").ok(),
            std::env::var("HISTORICAL_WEATHER_BASE_URL").ok(),
        );
        config.validate()?;
        Ok(config)
    }

    /// Apply token and URL overrides
    pub fn with_overrides(mut self, tokens: Option<String>, base_url: Option<String>) -> Self {
        if let Some(tokens) = tokens {
            self.tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(base_url) = base_url {
            self.base_url = base_url;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests_per_minute_per_token == 0 {
            return Err(ConfigError::Invalid(
                "max_requests_per_minute_per_token must be positive".into(),
            ));
        }
        if self.max_day_count == 0 {
            return Err(ConfigError::Invalid("max_day_count must be positive".into()));
        }
        for placeholder in ["{TOKEN}", "{DATE}", "{LOC_ID}"] {
            if !self.base_url.contains(placeholder) {
                return Err(ConfigError::Invalid(format!(
                    "base_url is missing the {placeholder} placeholder"
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(duplicate) = self.tokens.iter().find(|t| !seen.insert(t.as_str())) {
            return Err(ConfigError::Invalid(format!("duplicate token {duplicate}")));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// =============================================================================
// Historical weather converter
// =============================================================================

/// Converter from raw historical weather documents to observations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalWeatherConverterConfig {
    pub source_collection: String,
    pub target_collection: String,
    pub locations_collection: String,
    pub page_size: u64,
    pub update_frequency: TimeDelta,
    pub dependencies_unsatisfied_frequency: TimeDelta,
}

impl Default for HistoricalWeatherConverterConfig {
    fn default() -> Self {
        Self {
            source_collection: "historical_weather".to_string(),
            target_collection: "historical_weather_observations".to_string(),
            locations_collection: "locations".to_string(),
            page_size: 1000,
            update_frequency: TimeDelta::hours(1),
            dependencies_unsatisfied_frequency: TimeDelta::minutes(30),
        }
    }
}

impl HistoricalWeatherConverterConfig {
    pub const MODULE: &'static str = "historical_weather_converter";

    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_yaml(dir, Self::MODULE)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be positive".into()));
        }
        Ok(())
    }
}
