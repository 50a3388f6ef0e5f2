//! Climate data worker
//!
//! Concrete collector and converter modules run through the
//! `climate-durable` lifecycle engine, plus the process wiring around them.
//!
//! This crate provides:
//! - [`historical_weather`] - daily weather history backfill and conversion
//! - [`http`] - client for the daily history API
//! - [`config`] - process and per-module configuration
//! - [`telemetry`] - logging setup

pub mod config;
pub mod historical_weather;
pub mod http;
pub mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use climate_durable::coordinator::{ModuleRegistry, RegistryError};
use climate_durable::module::ModuleError;
use climate_durable::reliability::CallTimeout;

pub use config::{ConfigError, HistoricalWeatherConfig, HistoricalWeatherConverterConfig, WorkerConfig};
pub use historical_weather::{HistoricalWeatherCollector, HistoricalWeatherConverter};
pub use http::{HistoryApi, HttpHistoryApi};

impl From<ConfigError> for ModuleError {
    fn from(e: ConfigError) -> Self {
        ModuleError::Config(e.to_string())
    }
}

/// Register every module this worker knows about
///
/// Module configs are read from `config_dir` each time a module is built, so
/// edits take effect on the next cycle and an invalid file only fails the
/// module it belongs to.
pub fn register_modules(
    registry: &mut ModuleRegistry,
    config_dir: impl Into<PathBuf>,
) -> Result<(), RegistryError> {
    let config_dir: PathBuf = config_dir.into();

    let dir = config_dir.clone();
    registry.register(HistoricalWeatherConfig::MODULE, move |env| {
        let config = HistoricalWeatherConfig::load(&dir)?;
        let api = HttpHistoryApi::new(
            config.base_url.clone(),
            CallTimeout::new(config.request_timeout()),
        );
        Ok(HistoricalWeatherCollector::new(
            config,
            Arc::clone(&env.documents),
            Arc::new(api),
        ))
    })?;

    let dir = config_dir;
    registry.register(HistoricalWeatherConverterConfig::MODULE, move |env| {
        let config = HistoricalWeatherConverterConfig::load(&dir)?;
        Ok(HistoricalWeatherConverter::new(
            config,
            Arc::clone(&env.documents),
        ))
    })?;

    Ok(())
}

