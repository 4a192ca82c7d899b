//! Request, response and connection types exchanged with the engine.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::core::packet::{SERVERDATA_AUTH, SERVERDATA_EXECCOMMAND};

/// Correlation id the client uses for its login packet.
pub const AUTH_REQUEST_ID: i32 = 1;

/// Id the server uses in auth responses to signal a wrong password, and in
/// unsolicited keep-alives.
pub const UNSOLICITED_ID: i32 = -1;

/// The two request kinds a client sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Auth,
    ExecCommand,
}

impl RequestKind {
    /// Wire value of the type field.
    pub fn packet_type(self) -> i32 {
        match self {
            RequestKind::Auth => SERVERDATA_AUTH,
            RequestKind::ExecCommand => SERVERDATA_EXECCOMMAND,
        }
    }
}

/// What a request produced.
///
/// `server_responded == false` means nothing usable came back (not
/// connected, send failed, timed out, or no feedback was requested). An
/// empty `data` with `server_responded == true` is a real, empty answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub data: String,
    pub server_responded: bool,
}

impl Response {
    pub fn no_response() -> Self {
        Self::default()
    }

    pub fn responded(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            server_responded: true,
        }
    }
}

/// Completion callback for a queued request.
pub type ResponseCallback = Box<dyn FnOnce(Response) + Send + 'static>;

/// A queued request awaiting the client's drain worker.
pub struct OutgoingRequest {
    pub id: i32,
    pub kind: RequestKind,
    pub body: String,
    pub on_complete: Option<ResponseCallback>,
}

impl fmt::Debug for OutgoingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingRequest")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("body", &self.body)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

/// Server-assigned handle for one accepted connection.
pub type ConnectionId = u64;

/// Read-only view of a server connection, handed to command handlers and
/// integrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub authenticated: bool,
}
