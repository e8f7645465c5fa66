/// Retry policy with exponential backoff and jitter
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single backoff
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all; the first failure is final.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("non-retryable failure on attempt {attempts}: {last}")]
    Permanent { attempts: u32, last: E },
    #[error("cancelled while backing off after {attempts} attempts: {last}")]
    Cancelled { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// Number of calls made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Permanent { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// The error returned by the last call.
    pub fn into_last(self) -> E {
        match self {
            RetryError::Exhausted { last, .. }
            | RetryError::Permanent { last, .. }
            | RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// Execute a future with retry logic, retrying every error.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    with_retry_if(config, |_: &E| true, std::future::pending::<()>(), f).await
}

/// Execute a future with retry logic.
///
/// Errors for which `should_retry` returns false end the loop immediately.
/// `cancel` is only observed while sleeping between attempts; an attempt that
/// is already running is always awaited to completion.
pub async fn with_retry_if<F, Fut, T, E, P, C>(
    config: &RetryConfig,
    should_retry: P,
    cancel: C,
    mut f: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);
    let mut attempts = 0;

    loop {
        attempts += 1;

        let err = match f().await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        if !should_retry(&err) {
            return Err(RetryError::Permanent {
                attempts,
                last: err,
            });
        }

        if attempts > config.max_retries {
            warn!(
                attempts,
                max_retries = config.max_retries,
                error = %err,
                "Max retries reached"
            );
            return Err(RetryError::Exhausted {
                attempts,
                last: err,
            });
        }

        let delay = calculate_backoff(config.backoff_for(attempts), config.jitter);

        warn!(
            "Retry attempt {}/{}, waiting {:?}: {}",
            attempts, config.max_retries, delay, err
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut cancel => {
                return Err(RetryError::Cancelled {
                    attempts,
                    last: err,
                });
            }
        }
    }
}

fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let mut rng = rand::thread_rng();
        let jitter_factor = 1.0 + rng.gen_range(-0.3..0.3); // ±30%
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(10),
            jitter: false,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&RetryConfig::default(), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(3), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("temporary error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_max_retries_exceeded() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(2), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>("persistent error") }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 3, last: "persistent error" })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 3); // Initial + 2 retries
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry_if(
            &fast_config(5),
            |err: &&str| *err != "fatal",
            std::future::pending(),
            move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("fatal") }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_secs(60),
            jitter: false,
            ..Default::default()
        };

        let result = with_retry_if(
            &config,
            |_: &&str| true,
            async {},
            || async { Err::<(), _>("unavailable") },
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Cancelled { attempts: 1, .. }));
        assert_eq!(err.into_last(), "unavailable");
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let config = RetryConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(2), Duration::from_millis(200));
        assert_eq!(config.backoff_for(3), Duration::from_millis(400));
        assert_eq!(config.backoff_for(4), Duration::from_millis(500));
        assert_eq!(config.backoff_for(30), Duration::from_millis(500));
    }
}
