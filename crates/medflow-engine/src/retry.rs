use std::future::Future;
use std::time::Duration;

use tracing::warn;

use medflow_core::config::RetryConfig;
use medflow_core::error::{FlowError, Result};

/// How long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Constant wait between attempts.
    Fixed(Duration),
    /// Doubling wait with jitter, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

/// Bounded retry attached to a step descriptor.
///
/// Only failures classified transient by [`FlowError::is_transient`] are
/// attempted again; everything else goes straight to the commit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (never zero).
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Run the compute phase exactly once.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// Fixed wait between up to `max_attempts` attempts.
    pub const fn fixed(max_attempts: u32, wait: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(wait),
        }
    }

    /// Exponential backoff between up to `max_attempts` attempts.
    pub const fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { initial, max },
        }
    }

    /// Policy from the app-level retry config (`max_retries` extra attempts
    /// after the first).
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self::exponential(
            cfg.max_retries + 1,
            Duration::from_millis(cfg.initial_backoff_ms),
            Duration::from_millis(cfg.max_backoff_ms),
        )
    }

    /// Wait before attempt `attempt + 1` (zero-based failed attempt).
    fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(wait) => wait,
            Backoff::Exponential { initial, max } => {
                let ms = (initial.as_millis() as u64)
                    .saturating_mul(2u64.saturating_pow(attempt))
                    .min(max.as_millis() as u64);
                // Jitter: 0.8x to 1.2x
                let jitter = 0.8 + rand::random::<f64>() * 0.4;
                Duration::from_millis((ms as f64 * jitter) as u64)
            }
        }
    }
}

/// Drive one compute phase under a retry policy.
///
/// Returns the first success, or the last failure once the budget is
/// exhausted or a fatal error is hit.
pub(crate) async fn retrying<T, F, Fut>(name: &str, policy: &RetryPolicy, mut attempt_fn: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if e.is_transient() && attempt + 1 < attempts {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        step = %name,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying step compute"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some(e);
                    continue;
                }
                last_err = Some(e);
                break;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| FlowError::Config("retry loop without attempts".into())))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::ZERO);

        let result: Result<&str> = retrying("flaky", &policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FlowError::Overloaded("busy".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::ZERO);

        let result: Result<()> = retrying("strict", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FlowError::MalformedOutput("bad yaml".into())) }
        })
        .await;

        assert!(matches!(result, Err(FlowError::MalformedOutput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::ZERO);

        let result: Result<()> = retrying("always-busy", &policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(FlowError::Overloaded(format!("busy #{n}"))) }
        })
        .await;

        match result {
            Err(FlowError::Overloaded(msg)) => assert_eq!(msg, "busy #2"),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exponential_delay_caps() {
        let policy = RetryPolicy::exponential(
            5,
            Duration::from_millis(100),
            Duration::from_millis(400),
        );
        // 100ms * 2^10 would be far past the cap; jitter stays within 1.2x.
        let delay = policy.delay_after(10);
        assert!(delay <= Duration::from_millis(480));
    }
}
