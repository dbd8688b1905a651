//! Rate-limit guard around a single network operation.
//!
//! Upstream "please wait N seconds" signals are honoured exactly and never
//! count toward the retry budget. Other transient failures (connection
//! resets, 5xx) are retried with exponential backoff up to `max_retries`.
//! The guard keeps no state between calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Transient failure: back off and retry, counted against the cap.
    Retry,
    /// Rate limited: sleep for exactly this long, then retry. Uncapped.
    WaitFor(Duration),
    /// Permanent failure: surface immediately.
    Abort,
}

/// Exponential backoff configuration with jitter for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 5,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    /// Compute the delay for a given retry attempt (0-indexed).
    ///
    /// Formula: `min(base_delay * 2^retry, max_delay) + random_jitter(0..base_delay)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp_delay = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_secs);
        let jitter = if self.base_delay_secs > 0 {
            rand::thread_rng().gen_range(0..self.base_delay_secs)
        } else {
            0
        };
        Duration::from_secs(capped + jitter)
    }
}

/// Successful result of a guarded operation plus how hard it was to get.
#[derive(Debug)]
pub struct Guarded<T> {
    pub value: T,
    /// Transient-failure retries consumed.
    pub retries: u32,
    /// Rate-limit waits served.
    pub rate_limit_waits: u32,
}

impl<T> Guarded<T> {
    /// True when the value only arrived after at least one retry or wait.
    pub fn was_retried(&self) -> bool {
        self.retries > 0 || self.rate_limit_waits > 0
    }
}

/// Run `operation` under the rate-limit guard.
///
/// - `config`: backoff configuration for transient failures
/// - `classifier`: inspects an error and returns the [`RetryAction`]
/// - `operation`: the async closure to retry
///
/// Returns the first `Ok` result, or the last error once the classifier
/// aborts or the transient-retry budget is spent.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<Guarded<T>, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let mut retries: u32 = 0;
    let mut rate_limit_waits: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                return Ok(Guarded {
                    value,
                    retries,
                    rate_limit_waits,
                })
            }
            Err(e) => e,
        };

        match classifier(&err) {
            RetryAction::Abort => return Err(err),
            RetryAction::WaitFor(wait) => {
                rate_limit_waits += 1;
                tracing::warn!(
                    wait_secs = wait.as_secs(),
                    "Rate limited, waiting before retry: {}",
                    err
                );
                tokio::time::sleep(wait).await;
            }
            RetryAction::Retry => {
                if retries >= config.max_retries {
                    tracing::warn!(
                        attempts = retries + 1,
                        "Giving up after {} retries: {}",
                        retries,
                        err
                    );
                    return Err(err);
                }
                let delay = config.delay_for_retry(retries);
                retries += 1;
                tracing::warn!(
                    "Retryable error (retry {}/{}), retrying in {}s: {}",
                    retries,
                    config.max_retries,
                    delay.as_secs(),
                    err
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn no_delay(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_secs: 0,
            max_delay_secs: 0,
        }
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay_secs, 5);
        assert_eq!(config.max_delay_secs, 60);
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_secs: 2,
            max_delay_secs: 60,
        };
        // retry 0: 2*1=2, jitter in 0..2
        let d = config.delay_for_retry(0);
        assert!(d.as_secs() >= 2 && d.as_secs() < 4);

        // retry 2: 2*4=8, jitter in 0..2
        let d = config.delay_for_retry(2);
        assert!(d.as_secs() >= 8 && d.as_secs() < 10);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig {
            max_retries: 10,
            base_delay_secs: 5,
            max_delay_secs: 30,
        };
        let d = config.delay_for_retry(10);
        assert!(d.as_secs() >= 30 && d.as_secs() < 35);
    }

    #[test]
    fn test_delay_zero_base() {
        assert_eq!(no_delay(3).delay_for_retry(0).as_secs(), 0);
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let result: Result<Guarded<i32>, String> =
            retry_with_backoff(&no_delay(3), |_| RetryAction::Retry, || async { Ok(42) }).await;
        let guarded = result.unwrap();
        assert_eq!(guarded.value, 42);
        assert!(!guarded.was_retried());
    }

    #[tokio::test]
    async fn test_abort_on_non_retryable() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let result: Result<Guarded<i32>, String> = retry_with_backoff(
            &no_delay(3),
            |_| RetryAction::Abort,
            || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err("fatal".to_string())
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_cap_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let result: Result<Guarded<i32>, String> = retry_with_backoff(
            &no_delay(2),
            |_| RetryAction::Retry,
            || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err("still failing".to_string())
                }
            },
        )
        .await;
        assert_eq!(result.unwrap_err(), "still failing");
        // 1 initial + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_exactly_and_is_uncapped() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        let started = tokio::time::Instant::now();
        let result: Result<Guarded<&str>, String> = retry_with_backoff(
            &no_delay(0),
            |e: &String| {
                if e == "flood" {
                    RetryAction::WaitFor(Duration::from_secs(3))
                } else {
                    RetryAction::Abort
                }
            },
            || {
                let cc = cc.clone();
                async move {
                    if cc.fetch_add(1, Ordering::SeqCst) < 4 {
                        Err("flood".to_string())
                    } else {
                        Ok("done")
                    }
                }
            },
        )
        .await;
        let guarded = result.unwrap();
        assert_eq!(guarded.value, "done");
        assert_eq!(guarded.rate_limit_waits, 4);
        assert_eq!(guarded.retries, 0);
        assert_eq!(started.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_does_not_consume_transient_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let cc = calls.clone();
        // flood, reset, flood, reset, ok: two transient retries against a cap of 2
        let result: Result<Guarded<u32>, String> = retry_with_backoff(
            &no_delay(2),
            |e: &String| match e.as_str() {
                "flood" => RetryAction::WaitFor(Duration::from_secs(1)),
                _ => RetryAction::Retry,
            },
            || {
                let cc = cc.clone();
                async move {
                    match cc.fetch_add(1, Ordering::SeqCst) {
                        0 | 2 => Err("flood".to_string()),
                        1 | 3 => Err("reset".to_string()),
                        n => Ok(n),
                    }
                }
            },
        )
        .await;
        let guarded = result.unwrap();
        assert_eq!(guarded.value, 4);
        assert_eq!(guarded.retries, 2);
        assert_eq!(guarded.rate_limit_waits, 2);
        assert!(guarded.was_retried());
    }
}
