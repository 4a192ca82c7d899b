//! # Protocol Layer
//!
//! The RCON vocabulary on top of the packet codec.
//!
//! ## Components
//! - **Message**: request kinds, responses, queued requests, connection info
//! - **Handshake**: auth acceptance and response correlation rules
//! - **Dispatcher**: routes authenticated commands to the application handler
//!
//! ## Packet types
//! | Direction        | Name            | Value |
//! |------------------|-----------------|-------|
//! | client to server | `AUTH`          | 3     |
//! | client to server | `EXECCOMMAND`   | 2     |
//! | server to client | `AUTH_RESPONSE` | 2     |
//! | server to client | `RESPONSE_VALUE`| 0     |

pub mod dispatcher;
pub mod handshake;
pub mod message;
