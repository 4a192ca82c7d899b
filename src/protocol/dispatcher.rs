use crate::core::packet::{
    Packet, ReceivedPacket, MAX_BODY_SIZE, SERVERDATA_EXECCOMMAND, SERVERDATA_RESPONSE_VALUE,
};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::ConnectionInfo;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Application callback answering authenticated commands.
///
/// Runs on the connection's own worker and blocks that connection's I/O
/// until it returns, so it must return promptly.
pub trait CommandHandler: Send + Sync + 'static {
    fn handle(&self, client: &ConnectionInfo, command: &str) -> String;
}

impl<F> CommandHandler for F
where
    F: Fn(&ConnectionInfo, &str) -> String + Send + Sync + 'static,
{
    fn handle(&self, client: &ConnectionInfo, command: &str) -> String {
        self(client, command)
    }
}

/// How an authenticated packet was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran; carries the command text.
    Executed(String),
    /// No handler registered; an empty reply was sent.
    Unhandled(String),
    /// The packet type is not valid once authenticated.
    InvalidType(i32),
}

/// Routes authenticated packets to the registered command handler.
pub struct Dispatcher {
    handler: Arc<RwLock<Option<Arc<dyn CommandHandler>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handler: Arc::new(RwLock::new(None)),
        }
    }

    pub fn register<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler,
    {
        let mut slot = self
            .handler
            .write()
            .map_err(|_| ProtocolError::LockPoisoned)?;

        *slot = Some(Arc::new(handler));
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let mut slot = self
            .handler
            .write()
            .map_err(|_| ProtocolError::LockPoisoned)?;

        *slot = None;
        Ok(())
    }

    pub fn has_handler(&self) -> bool {
        self.handler.read().map(|h| h.is_some()).unwrap_or(false)
    }

    /// Build the reply to one packet from an authenticated connection.
    ///
    /// The handler is cloned out of the lock before it runs so a slow
    /// command never blocks re-registration.
    pub fn dispatch(
        &self,
        client: &ConnectionInfo,
        packet: &ReceivedPacket,
    ) -> Result<(Packet, DispatchOutcome)> {
        let id = packet.id().ok_or(ProtocolError::InvalidHeader)?;
        let packet_type = packet.packet_type().ok_or(ProtocolError::InvalidHeader)?;

        if packet_type != SERVERDATA_EXECCOMMAND {
            let text = format!("Invalid packet type ({packet_type}). Double check your packets.");
            return Ok((
                Packet::new(id, SERVERDATA_RESPONSE_VALUE, text),
                DispatchOutcome::InvalidType(packet_type),
            ));
        }

        let command = packet.body_string();
        let handler = self
            .handler
            .read()
            .map_err(|_| ProtocolError::LockPoisoned)?
            .clone();

        let Some(handler) = handler else {
            // Never synthesize a "no handler" text: clients would take it
            // for the command's output.
            return Ok((
                Packet::new(id, SERVERDATA_RESPONSE_VALUE, Vec::new()),
                DispatchOutcome::Unhandled(command),
            ));
        };

        let mut reply = handler.handle(client, &command);
        if reply.len() > MAX_BODY_SIZE {
            warn!(
                command = %command,
                reply_len = reply.len(),
                "{}; replying empty",
                constants::ERR_OVERSIZED_PACKET
            );
            reply.clear();
        }

        Ok((
            Packet::new(id, SERVERDATA_RESPONSE_VALUE, reply),
            DispatchOutcome::Executed(command),
        ))
    }
}
