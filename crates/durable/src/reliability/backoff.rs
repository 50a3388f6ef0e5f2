//! Failure history and exponential restart backoff
//!
//! A module that keeps failing with the same error class waits a random
//! 2x-10x longer after each failure before it is retried, capped at one day.
//! A different error class, or a clean run, resets the wait to the minimum.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::schedule::{is_due_at, TimeDelta};

/// Configuration for restart backoff
///
/// # Example
///
/// ```
/// use climate_durable::BackoffPolicy;
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::default()
///     .with_min_backoff(Duration::from_secs(5))
///     .with_max_backoff(Duration::from_secs(3_600));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Wait after the first failure of a given class
    #[serde(with = "duration_millis")]
    pub min_backoff: Duration,

    /// Upper bound for any wait
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,

    /// Lower bound of the random growth factor
    pub min_factor: u32,

    /// Upper bound of the random growth factor (inclusive)
    pub max_factor: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(86_400),
            min_factor: 2,
            max_factor: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn with_min_backoff(mut self, backoff: Duration) -> Self {
        self.min_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Use a fixed growth factor (mainly for deterministic tests)
    pub fn with_factor(mut self, factor: u32) -> Self {
        self.min_factor = factor.max(1);
        self.max_factor = factor.max(1);
        self
    }

    /// The reset value, expressed as a checkpoint interval
    pub fn initial(&self) -> TimeDelta {
        TimeDelta::seconds(self.min_backoff.as_secs() as i64)
    }

    /// Grow `previous` by a random factor, capped at `max_backoff`
    pub fn next(&self, previous: &TimeDelta) -> TimeDelta {
        let previous_secs = previous
            .as_seconds()
            .unwrap_or(self.min_backoff.as_secs() as i64)
            .max(self.min_backoff.as_secs() as i64)
            .max(1);
        let factor = if self.max_factor > self.min_factor {
            rand::thread_rng().gen_range(self.min_factor..=self.max_factor)
        } else {
            self.min_factor
        };
        let grown = previous_secs.saturating_mul(i64::from(factor));
        TimeDelta::seconds(grown.min(self.max_backoff.as_secs() as i64))
    }
}

/// Failure bookkeeping persisted inside every checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureHistory {
    /// The last run failed; the next run waits for `backoff` instead of the
    /// update frequency
    pub restart_required: bool,

    /// Class of the most recent failure
    pub last_error: Option<String>,

    /// Failure counts per error class
    pub errors: BTreeMap<String, u32>,

    /// Current restart wait
    pub backoff: TimeDelta,

    /// When the most recent failure was recorded
    pub failed_at: Option<DateTime<Utc>>,
}

impl Default for FailureHistory {
    fn default() -> Self {
        Self {
            restart_required: false,
            last_error: None,
            errors: BTreeMap::new(),
            backoff: BackoffPolicy::default().initial(),
            failed_at: None,
        }
    }
}

impl FailureHistory {
    /// Record a failed run of class `class`
    pub fn record_failure(&mut self, class: &str, policy: &BackoffPolicy, now: DateTime<Utc>) {
        *self.errors.entry(class.to_string()).or_insert(0) += 1;
        self.backoff = if self.last_error.as_deref() == Some(class) {
            policy.next(&self.backoff)
        } else {
            policy.initial()
        };
        self.last_error = Some(class.to_string());
        self.restart_required = true;
        self.failed_at = Some(now);
    }

    /// Record a clean run
    pub fn record_success(&mut self, policy: &BackoffPolicy) {
        self.restart_required = false;
        self.backoff = policy.initial();
    }

    /// Whether the restart wait after the last failure has elapsed
    pub fn restart_due_at(&self, now: DateTime<Utc>) -> bool {
        is_due_at(self.failed_at, &self.backoff, now)
    }

    pub fn total_failures(&self) -> u32 {
        self.errors.values().sum()
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
