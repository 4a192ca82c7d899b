//! Timeout defaults and async timeout wrappers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Connect and receive timeout (seconds in the classic protocol docs).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// Silence on an authenticated connection before the server sends a keep-alive.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Upper bound on how long a connection worker waits before re-checking
/// liveness and shutdown.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Graceful shutdown budget for the server.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Frames a client will read while looking for its response.
pub const MAX_RETRIES_TO_RECEIVE: u32 = 500;

/// Run `fut`, failing with [`ProtocolError::Timeout`] if it takes longer than `dur`.
pub async fn with_timeout<F, T>(fut: F, dur: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(dur, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)
}
