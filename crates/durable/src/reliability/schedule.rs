//! Work-due scheduling
//!
//! A module is due for new work once `last_request + update_frequency` is in
//! the past. Month and year units roll over on the calendar instead of being
//! approximated as fixed second counts.

use std::fmt;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

/// Unit of a [`TimeDelta`]
///
/// Short aliases (`s`, `min`, `h`, `day`, ...) are accepted when reading
/// checkpoints and config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    #[serde(alias = "s")]
    Seconds,
    #[serde(alias = "min")]
    Minutes,
    #[serde(alias = "h")]
    Hours,
    #[serde(alias = "day")]
    Days,
    #[serde(alias = "week")]
    Weeks,
    #[serde(alias = "month")]
    Months,
    #[serde(alias = "year")]
    Years,
    /// No longer schedule automatically
    #[serde(alias = "NEVER")]
    Never,
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds => write!(f, "seconds"),
            Self::Minutes => write!(f, "minutes"),
            Self::Hours => write!(f, "hours"),
            Self::Days => write!(f, "days"),
            Self::Weeks => write!(f, "weeks"),
            Self::Months => write!(f, "months"),
            Self::Years => write!(f, "years"),
            Self::Never => write!(f, "never"),
        }
    }
}

/// A calendar-aware interval, persisted as `{"value": 1, "units": "days"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeDelta {
    /// Amount of `units`; `None` only makes sense together with `Never`
    pub value: Option<i64>,
    pub units: TimeUnit,
}

impl TimeDelta {
    pub fn new(value: i64, units: TimeUnit) -> Self {
        Self {
            value: Some(value),
            units,
        }
    }

    pub fn seconds(value: i64) -> Self {
        Self::new(value, TimeUnit::Seconds)
    }

    pub fn minutes(value: i64) -> Self {
        Self::new(value, TimeUnit::Minutes)
    }

    pub fn hours(value: i64) -> Self {
        Self::new(value, TimeUnit::Hours)
    }

    pub fn days(value: i64) -> Self {
        Self::new(value, TimeUnit::Days)
    }

    pub fn months(value: i64) -> Self {
        Self::new(value, TimeUnit::Months)
    }

    pub fn never() -> Self {
        Self {
            value: None,
            units: TimeUnit::Never,
        }
    }

    pub fn is_never(&self) -> bool {
        self.units == TimeUnit::Never
    }

    /// Fixed-length approximation in seconds, `None` for calendar units and `Never`
    pub fn as_seconds(&self) -> Option<i64> {
        let value = self.value.unwrap_or(0);
        match self.units {
            TimeUnit::Seconds => Some(value),
            TimeUnit::Minutes => value.checked_mul(60),
            TimeUnit::Hours => value.checked_mul(3_600),
            TimeUnit::Days => value.checked_mul(86_400),
            TimeUnit::Weeks => value.checked_mul(604_800),
            TimeUnit::Months | TimeUnit::Years | TimeUnit::Never => None,
        }
    }

    /// Add this interval to `instant`
    ///
    /// Returns `None` for `Never` and on overflow.
    pub fn add_to(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let value = self.value.unwrap_or(0);
        match self.units {
            TimeUnit::Never => None,
            TimeUnit::Months => add_months(instant, value),
            TimeUnit::Years => add_months(instant, value.checked_mul(12)?),
            _ => {
                let seconds = self.as_seconds()?;
                instant.checked_add_signed(Duration::try_seconds(seconds)?)
            }
        }
    }
}

impl fmt::Display for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) if !self.is_never() => write!(f, "{} {}", value, self.units),
            _ => write!(f, "{}", self.units),
        }
    }
}

fn add_months(instant: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        instant.checked_add_months(magnitude)
    } else {
        instant.checked_sub_months(magnitude)
    }
}

/// Whether a checkpoint is stale enough to justify new work
///
/// `Never` is never due; a missing `last_request` is always due.
pub fn is_due(last_request: Option<DateTime<Utc>>, frequency: &TimeDelta) -> bool {
    is_due_at(last_request, frequency, Utc::now())
}

/// [`is_due`] evaluated against an explicit `now`
pub fn is_due_at(
    last_request: Option<DateTime<Utc>>,
    frequency: &TimeDelta,
    now: DateTime<Utc>,
) -> bool {
    if frequency.is_never() {
        return false;
    }
    let Some(last_request) = last_request else {
        return true;
    };
    match frequency.add_to(last_request) {
        Some(due_at) => now >= due_at,
        // Overflowing intervals are effectively infinite
        None => false,
    }
}
