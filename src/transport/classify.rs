//! Socket error classification.
//!
//! Maps I/O failures onto a small closed set of classes used for logging.
//! The mapping is table-driven: supporting a new platform means adding rows
//! to [`OS_CODES`], not new branches at call sites. Classification never
//! changes control flow.

use std::fmt;
use std::io;

use crate::error::ProtocolError;
use crate::utils::logging::EventLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketErrorClass {
    /// The peer reset or closed the connection.
    Disconnected,
    /// The call was interrupted, typically while shutting down.
    ShuttingDown,
    Unknown,
}

impl fmt::Display for SocketErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SocketErrorClass::Disconnected => "disconnected",
            SocketErrorClass::ShuttingDown => "shutting down",
            SocketErrorClass::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Portable mapping by error kind.
const KINDS: &[(io::ErrorKind, SocketErrorClass)] = &[
    (io::ErrorKind::ConnectionReset, SocketErrorClass::Disconnected),
    (io::ErrorKind::ConnectionAborted, SocketErrorClass::Disconnected),
    (io::ErrorKind::BrokenPipe, SocketErrorClass::Disconnected),
    (io::ErrorKind::NotConnected, SocketErrorClass::Disconnected),
    (io::ErrorKind::UnexpectedEof, SocketErrorClass::Disconnected),
    (io::ErrorKind::Interrupted, SocketErrorClass::ShuttingDown),
];

/// Raw platform codes, consulted before [`KINDS`].
#[cfg(target_os = "linux")]
const OS_CODES: &[(i32, SocketErrorClass)] = &[
    (32, SocketErrorClass::Disconnected),  // EPIPE
    (104, SocketErrorClass::Disconnected), // ECONNRESET
    (4, SocketErrorClass::ShuttingDown),   // EINTR
];

#[cfg(target_os = "macos")]
const OS_CODES: &[(i32, SocketErrorClass)] = &[
    (32, SocketErrorClass::Disconnected), // EPIPE
    (54, SocketErrorClass::Disconnected), // ECONNRESET
    (4, SocketErrorClass::ShuttingDown),  // EINTR
];

#[cfg(windows)]
const OS_CODES: &[(i32, SocketErrorClass)] = &[
    (10054, SocketErrorClass::Disconnected), // WSAECONNRESET
    (10004, SocketErrorClass::ShuttingDown), // WSAEINTR
];

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
const OS_CODES: &[(i32, SocketErrorClass)] = &[];

/// Classify a socket-level I/O error.
pub fn classify(err: &io::Error) -> SocketErrorClass {
    if let Some(code) = err.raw_os_error() {
        if let Some((_, class)) = OS_CODES.iter().find(|(c, _)| *c == code) {
            return *class;
        }
    }

    KINDS
        .iter()
        .find(|(kind, _)| *kind == err.kind())
        .map(|(_, class)| *class)
        .unwrap_or(SocketErrorClass::Unknown)
}

/// Classify any protocol error, looking through to the I/O cause.
pub fn classify_error(err: &ProtocolError) -> SocketErrorClass {
    match err {
        ProtocolError::Io(io) => classify(io),
        ProtocolError::ConnectionClosed | ProtocolError::PeerDisconnected => {
            SocketErrorClass::Disconnected
        }
        _ => SocketErrorClass::Unknown,
    }
}

/// Log `err` with its classification and return the class.
pub fn report_error(err: &ProtocolError, log: &EventLog) -> SocketErrorClass {
    let class = classify_error(err);
    match err {
        ProtocolError::Io(io) => log.debug(&format!(
            "Error code: {} ({class})",
            io.raw_os_error().unwrap_or(-1)
        )),
        other => log.debug(&format!("Error: {other} ({class})")),
    }
    class
}
