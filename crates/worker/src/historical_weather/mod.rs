//! Historical weather backfill
//!
//! This module provides:
//! - [`HistoricalWeatherCollector`], walking each location's history backwards
//!   one day per request until the source runs dry
//! - [`HistoricalWeatherConverter`], normalizing stored raw documents into
//!   [`HistoricalWeatherObservation`]s
//! - [`TokenPool`] and [`BackfillCursor`], the persisted progress of the collector

mod collector;
mod converter;
mod cursor;
mod observation;
mod tokens;

pub use collector::{HistoricalWeatherCollector, HistoricalWeatherFields};
pub use converter::{ConverterFields, HistoricalWeatherConverter};
pub use cursor::BackfillCursor;
pub use observation::{normalize_wind_direction, HistoricalWeatherObservation, ObservationError};
pub use tokens::{TokenPool, TokenState};

use chrono::{DateTime, NaiveDate, NaiveTime};

/// Midnight UTC of `date`, in epoch milliseconds
pub fn utc_midnight_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// UTC calendar date of an epoch-milliseconds timestamp
pub fn date_from_millis(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|instant| instant.date_naive())
}
