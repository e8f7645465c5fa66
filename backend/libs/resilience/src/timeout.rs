//! Timeout wrapper for fallible async calls
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimeoutError {
    #[error("Operation timed out after {0:?}")]
    Elapsed(Duration),
}

/// Execute a fallible future with a deadline.
///
/// The elapsed case is converted into `E` with `on_elapsed`, so callers keep a
/// single error type and can classify a timeout like any other failure.
pub async fn with_timeout_or<F, T, E, M>(duration: Duration, future: F, on_elapsed: M) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    M: FnOnce(TimeoutError) -> E,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(on_elapsed(TimeoutError::Elapsed(duration))),
    }
}
