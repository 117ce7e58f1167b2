//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::KestrelError;

/// Wrap a future with an optional timeout.
pub async fn with_timeout<T>(
    duration: Option<Duration>,
    future: impl Future<Output = Result<T, KestrelError>>,
) -> Result<T, KestrelError> {
    let Some(duration) = duration else {
        return future.await;
    };
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(KestrelError::Timeout(duration.as_millis() as u64)),
    }
}
