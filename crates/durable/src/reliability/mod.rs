//! Reliability patterns for module execution
//!
//! This module provides:
//! - [`is_due`] / [`TimeDelta`] - Work-due policy with calendar-aware intervals
//! - [`BackoffPolicy`] / [`FailureHistory`] - Exponential restart backoff after failures
//! - [`CallTimeout`] - Wall-clock guard for network calls

mod backoff;
mod schedule;
mod timeout;

pub use backoff::{BackoffPolicy, FailureHistory};
pub(crate) use backoff::duration_millis;
pub use schedule::{is_due, is_due_at, TimeDelta, TimeUnit};
pub use timeout::{guarded, CallTimeout, TimeoutError};
