//! Per-connection liveness tracking.

use std::time::Duration;
use tokio::time::Instant;

/// Tracks when a connection last showed signs of life.
///
/// Owned by the connection's worker; nothing else writes it.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    last: Instant,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    /// Record traffic or a sent keep-alive.
    pub fn touch(&mut self) {
        self.last = Instant::now();
    }

    /// True once `interval` has passed since the last touch.
    pub fn is_due(&self) -> bool {
        self.last.elapsed() >= self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn due_only_after_interval() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(30));
        assert!(!heartbeat.is_due());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!heartbeat.is_due());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(heartbeat.is_due());

        heartbeat.touch();
        assert!(!heartbeat.is_due());
    }
}
