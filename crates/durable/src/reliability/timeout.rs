//! Wall-clock guard for network calls
//!
//! Every outbound call a module makes inside `fetch` is bounded. An elapsed
//! call surfaces as [`TimeoutError::Elapsed`] so callers can treat it like any
//! other unusable response instead of hanging the lifecycle.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Timeout-related errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeoutError {
    /// The guarded call did not complete in time
    #[error("call timed out after {limit:?}")]
    Elapsed { limit: Duration },
}

/// Timeout configuration for guarded calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeout {
    limit: Duration,
}

impl Default for CallTimeout {
    fn default() -> Self {
        Self {
            limit: Duration::from_secs(10),
        }
    }
}

impl CallTimeout {
    pub fn new(limit: Duration) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Run `future` under this timeout
    pub async fn run<F, T>(&self, future: F) -> Result<T, TimeoutError>
    where
        F: Future<Output = T>,
    {
        guarded(self.limit, future).await
    }
}

/// Run `future`, giving up after `limit`
pub async fn guarded<F, T>(limit: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(value) => Ok(value),
        Err(_) => {
            warn!(limit_ms = limit.as_millis() as u64, "guarded call timed out");
            Err(TimeoutError::Elapsed { limit })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_limit() {
        let result = guarded(Duration::from_millis(200), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_elapsed_call_is_reported() {
        let timeout = CallTimeout::new(Duration::from_millis(50));
        let result = timeout
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert_eq!(
            result,
            Err(TimeoutError::Elapsed {
                limit: Duration::from_millis(50)
            })
        );
    }

    #[test]
    fn test_default_limit() {
        assert_eq!(CallTimeout::default().limit(), Duration::from_secs(10));
    }

    #[test]
    fn test_guard_from_sync_context() {
        let value = tokio_test::block_on(guarded(Duration::from_secs(1), async { "ok" }));
        assert_eq!(value, Ok("ok"));
    }
}
