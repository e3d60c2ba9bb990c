//! Transparent credential refresh.
//!
//! Expired access credentials must stay invisible to the orchestration
//! layer: an operation rejected for authentication reasons is retried once
//! after a refresh, and only the second failure is surfaced.

use std::future::Future;

use tracing::debug;

use crate::adapter::CalendarAdapter;
use crate::error::AdapterResult;

/// Runs `op`, refreshing the adapter's credential and retrying exactly once
/// if the first attempt fails with `AuthenticationFailed`.
///
/// A failed refresh is returned as-is; it is an `AuthenticationFailed`
/// error for revoked consent.
pub async fn with_auth_retry<A, T, F, Fut>(adapter: &A, op: F) -> AdapterResult<T>
where
    A: CalendarAdapter + ?Sized,
    F: Fn() -> Fut,
    Fut: Future<Output = AdapterResult<T>>,
{
    match op().await {
        Err(e) if e.is_authentication() => {
            debug!(adapter = %adapter.id(), error = %e, "Credential rejected, refreshing once");
            adapter.refresh_authentication().await?;
            op().await
        }
        other => other,
    }
}
