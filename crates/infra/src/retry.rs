//! One-shot retry for transient store failures.

use std::future::Future;
use std::time::Duration;

use ctms_auth::AuthError;

pub const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Run `op`; if it fails with a transient error, sleep briefly and run it once more.
///
/// Only use this for idempotent operations.
pub async fn retry_transient<T, F, Fut>(mut op: F) -> Result<T, AuthError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AuthError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::warn!(error = %e, "transient store failure; retrying once");
            tokio::time::sleep(RETRY_BACKOFF).await;
            op().await
        }
        other => other,
    }
}
