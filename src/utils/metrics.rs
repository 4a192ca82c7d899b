//! Observability and Metrics
//!
//! Per-endpoint counters for connections, authentication, commands and
//! traffic. Every server and client owns one [`Metrics`]; counters are
//! atomic so the accept loop, connection workers and the drain worker can
//! record concurrently. Read them through [`Metrics::snapshot`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

#[inline]
fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

#[inline]
fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Counters for one RCON endpoint.
#[derive(Debug)]
pub struct Metrics {
    accepted: AtomicU64,
    open: AtomicU64,
    refused: AtomicU64,
    auth_ok: AtomicU64,
    auth_failed: AtomicU64,
    commands: AtomicU64,
    violations: AtomicU64,
    heartbeats: AtomicU64,
    frames_out: AtomicU64,
    frames_in: AtomicU64,
    bytes_out: AtomicU64,
    bytes_in: AtomicU64,
    socket_errors: AtomicU64,
    created: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            open: AtomicU64::new(0),
            refused: AtomicU64::new(0),
            auth_ok: AtomicU64::new(0),
            auth_failed: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
            frames_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            socket_errors: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// A TCP connection was opened (server: accepted, client: connected).
    pub fn connection_established(&self) {
        bump(&self.accepted, 1);
        bump(&self.open, 1);
    }

    /// A TCP connection was torn down. Extra calls leave the gauge at zero.
    pub fn connection_closed(&self) {
        let _ = self
            .open
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Turned away at the connection limit.
    pub fn connection_refused(&self) {
        bump(&self.refused, 1);
    }

    pub fn auth_succeeded(&self) {
        bump(&self.auth_ok, 1);
    }

    /// Wrong password, or no usable auth response.
    pub fn auth_rejected(&self) {
        bump(&self.auth_failed, 1);
    }

    /// Server: a command reached dispatch. Client: a command was answered.
    pub fn command_executed(&self) {
        bump(&self.commands, 1);
    }

    /// A packet type not valid for the connection's state.
    pub fn protocol_violation(&self) {
        bump(&self.violations, 1);
    }

    pub fn heartbeat_sent(&self) {
        bump(&self.heartbeats, 1);
    }

    /// One frame written; `bytes` includes the size field.
    pub fn packet_sent(&self, bytes: u64) {
        bump(&self.frames_out, 1);
        bump(&self.bytes_out, bytes);
    }

    /// One frame read; `bytes` includes the size field.
    pub fn packet_received(&self, bytes: u64) {
        bump(&self.frames_in, 1);
        bump(&self.bytes_in, bytes);
    }

    pub fn connection_error(&self) {
        bump(&self.socket_errors, 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: read(&self.accepted),
            connections_active: read(&self.open),
            connections_refused: read(&self.refused),
            auth_success: read(&self.auth_ok),
            auth_failed: read(&self.auth_failed),
            commands_executed: read(&self.commands),
            protocol_violations: read(&self.violations),
            heartbeats_sent: read(&self.heartbeats),
            packets_sent: read(&self.frames_out),
            packets_received: read(&self.frames_in),
            bytes_sent: read(&self.bytes_out),
            bytes_received: read(&self.bytes_in),
            connection_errors: read(&self.socket_errors),
            uptime_seconds: self.created.elapsed().as_secs(),
        }
    }

    /// Emit the current counters as one structured `info` event.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            connections = s.connections_total,
            open = s.connections_active,
            refused = s.connections_refused,
            auth_ok = s.auth_success,
            auth_failed = s.auth_failed,
            commands = s.commands_executed,
            violations = s.protocol_violations,
            heartbeats = s.heartbeats_sent,
            packets_out = s.packets_sent,
            packets_in = s.packets_received,
            bytes_out = s.bytes_sent,
            bytes_in = s.bytes_received,
            errors = s.connection_errors,
            uptime_s = s.uptime_seconds,
            "RCON metrics"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_refused: u64,
    pub auth_success: u64,
    pub auth_failed: u64,
    pub commands_executed: u64,
    pub protocol_violations: u64,
    pub heartbeats_sent: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connection_errors: u64,
    pub uptime_seconds: u64,
}

/// Logs how long a request/response exchange took when dropped.
pub struct Timer {
    started: Instant,
    label: &'static str,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        Self {
            started: Instant::now(),
            label,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!(
            exchange = self.label,
            elapsed_us = self.started.elapsed().as_micros() as u64,
            "Exchange finished"
        );
    }
}
