//! Fail-open utilities for graceful degradation
//!
//! Use these for infrastructure side effects that must not break the calling
//! operation: spend reporting, scheduled mining cycles, persistence of
//! derived data.
//!
//! DO NOT use fail-open for:
//! - Node state transitions (correctness)
//! - Planning (callers need the error)
//! - Budget checks before a node starts

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open (infrastructure, not business logic)
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// # Usage
///
/// ```no_run
/// use marshal_core::fail_open::fail_open;
/// use marshal_core::Result;
///
/// async fn report_spend() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let result = fail_open("budget::record_spend", || report_spend()).await;
///     // result is None if report_spend() failed, otherwise Some(())
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Synchronous variant for per-item work inside a larger batch
///
/// The failing item is logged and skipped; the batch continues.
pub fn fail_open_sync<F, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Result<T>,
{
    match f() {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
