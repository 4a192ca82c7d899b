//! # rcon-protocol
//!
//! Client and server for the Source-engine RCON protocol on top of tokio.
//!
//! ## Layers
//! - [`core`]: packet layout and the framing codec
//! - [`transport`]: TCP connect, bind and framed I/O, socket error classes
//! - [`protocol`]: request kinds, correlation rules and command dispatch
//! - [`service`]: [`RconClient`] and [`RconServer`]
//! - [`utils`]: logging, timing constants and metrics
//!
//! ## Example
//! ```no_run
//! use rcon_protocol::{RconServer, ServerConfig, ConnectionInfo};
//!
//! # async fn run() -> rcon_protocol::Result<()> {
//! let server = RconServer::new(ServerConfig::new("0.0.0.0:27015", "changeme"));
//! server.on_command(|_: &ConnectionInfo, command: &str| format!("echo: {command}"))?;
//! server.start(false).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::{ClientConfig, LoggingConfig, NetworkConfig, ServerConfig};
pub use crate::core::codec::RconCodec;
pub use crate::core::packet::{Packet, ReceivedPacket};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::dispatcher::CommandHandler;
pub use crate::protocol::message::{ConnectionId, ConnectionInfo, RequestKind, Response};
pub use crate::service::{ClientState, RconClient, RconServer};
pub use crate::utils::logging::{init_logging, EventLog, LogHook};
