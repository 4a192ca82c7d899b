//! Authentication and response correlation rules.
//!
//! Client side: classify each received frame while waiting for a particular
//! request id. Server side: check a login body and build the auth response.
//!
//! `SERVERDATA_AUTH_RESPONSE` shares its wire value with
//! `SERVERDATA_EXECCOMMAND`, so which rule applies depends only on what the
//! caller is waiting for.

use crate::core::packet::{Packet, ReceivedPacket, SERVERDATA_AUTH_RESPONSE};
use crate::protocol::message::{Response, UNSOLICITED_ID};

/// Verdict on one frame received while waiting for an auth response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    /// Not an auth response (e.g. the empty value packet some servers send
    /// first); keep reading.
    Skip,
    Accepted,
    Rejected,
}

/// Verdict on one frame received while waiting for a command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStep {
    /// Noise or an answer to some other id; discarded.
    Skip,
    Matched(Response),
}

/// The server echoes the sent id on success and `-1` on failure; any other
/// id in an auth response is a protocol violation and counts as failure.
pub fn auth_outcome(packet: &ReceivedPacket, sent_id: i32) -> AuthStep {
    if !packet.has_payload() || packet.packet_type() != Some(SERVERDATA_AUTH_RESPONSE) {
        return AuthStep::Skip;
    }

    match packet.id() {
        Some(id) if id == sent_id => AuthStep::Accepted,
        _ => AuthStep::Rejected,
    }
}

/// The first frame whose id matches the request is the answer. A frame
/// with a non-positive size is an empty answer.
pub fn command_outcome(packet: &ReceivedPacket, sent_id: i32) -> CommandStep {
    if packet.size <= 0 {
        return CommandStep::Matched(Response {
            data: String::new(),
            server_responded: packet.server_responded,
        });
    }

    if packet.has_payload() && packet.id() == Some(sent_id) {
        return CommandStep::Matched(Response::responded(packet.body_string()));
    }

    CommandStep::Skip
}

/// Compare a login body against the configured password without leaking
/// the mismatch position through timing.
pub fn verify_password(expected: &str, body: &[u8]) -> bool {
    let expected = expected.as_bytes();
    if expected.len() != body.len() {
        return false;
    }
    expected
        .iter()
        .zip(body)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Empty auth response: the request id on success, `-1` on failure.
pub fn auth_response(request_id: i32, accepted: bool) -> Packet {
    let id = if accepted { request_id } else { UNSOLICITED_ID };
    Packet::new(id, SERVERDATA_AUTH_RESPONSE, Vec::new())
}
