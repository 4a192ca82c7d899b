//! # Error Types
//!
//! Error handling for the RCON protocol engine.
//!
//! This module defines every error variant that can surface from protocol
//! operations, from socket failures up to authentication rejections.
//!
//! ## Error Categories
//! - **Configuration**: invalid address, port or timeout values
//! - **Connection**: connect failures, timeouts, peers going away
//! - **Authentication**: rejected passwords, missing auth responses
//! - **Framing**: oversized packets, truncated or malformed headers
//!
//! Connection-level failures are normally reported through logging and the
//! `server_responded` / `connected` flags rather than returned to callers;
//! the typed errors below surface from `start()`, configuration loading and
//! the low-level codec.
//!
//! ## Example Usage
//! ```rust
//! use rcon_protocol::core::packet;
//! use rcon_protocol::error::ProtocolError;
//!
//! let body = "x".repeat(5000);
//! match packet::encode(body.as_bytes(), 7, packet::SERVERDATA_EXECCOMMAND) {
//!     Err(ProtocolError::OversizedPacket(size)) => assert_eq!(size, 5010),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NOT_CONNECTED: &str = "Cannot send data when not connected";
    pub const ERR_CONNECT_TIMEOUT: &str = "Timed out connecting to RCON server";
    pub const ERR_SEND_FAILED: &str = "Sending failed";

    /// Authentication errors
    pub const ERR_AUTH_REJECTED: &str = "Login data was incorrect";
    pub const ERR_AUTH_NO_RESPONSE: &str = "Server did not answer the auth request";

    /// Framing errors
    pub const ERR_OVERSIZED_PACKET: &str = "This packet is too big to send";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connect error: {0}")]
    ConnectError(String),

    #[error("Authentication rejected by server")]
    AuthRejected,

    #[error("No authentication response from server")]
    AuthTimeout,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Invalid packet header")]
    InvalidHeader,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Peer disconnected")]
    PeerDisconnected,

    #[error("Invalid packet type ({0})")]
    ProtocolViolation(i32),

    #[error("Send failed: {0}")]
    SendFailure(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Synchronization primitive poisoned")]
    LockPoisoned,
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        let err: ProtocolError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert!(matches!(err, ProtocolError::Io(_)));
    }

    #[test]
    fn violation_message_names_type() {
        assert_eq!(
            ProtocolError::ProtocolViolation(7).to_string(),
            "Invalid packet type (7)"
        );
    }
}
