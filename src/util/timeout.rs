//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::ConnectError;

/// Bound a connect attempt; elapsed time maps to [`ConnectError::Timeout`].
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, ConnectError>>,
) -> Result<T, ConnectError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ConnectError::Timeout(duration.as_millis() as u64)),
    }
}
