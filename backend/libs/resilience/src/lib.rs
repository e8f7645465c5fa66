//! Resilience helpers for calls into external backends
//!
//! - **Retry**: exponential backoff with jitter, a retryability predicate and
//!   cancellation while waiting between attempts
//! - **Timeout**: bounds a single fallible call and folds the elapsed case into
//!   the caller's own error type
//!
//! # Example: retry transient failures until shutdown
//!
//! ```rust,no_run
//! use resilience::{with_retry_if, RetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RetryConfig::default();
//!     let shutdown = std::future::pending::<()>();
//!
//!     let result = with_retry_if(
//!         &config,
//!         |err: &String| err.starts_with("unavailable"),
//!         shutdown,
//!         || async { Ok::<_, String>(()) },
//!     )
//!     .await;
//!     assert!(result.is_ok());
//! }
//! ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
pub use timeout::{with_timeout_or, TimeoutError};
