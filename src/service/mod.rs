//! # Service Layer
//!
//! The two endpoints of the protocol.
//!
//! ## Components
//! - **Client**: one authenticated session with a FIFO request queue
//! - **Server**: listener, per-connection workers and the handler hook
//! - **Registry**: the server's table of live connections
//! - **Heartbeat**: keep-alive timing for authenticated connections

pub mod client;
pub mod heartbeat;
pub mod registry;
pub mod server;

pub use client::{ClientState, RconClient};
pub use server::RconServer;
