//! # Core Protocol Components
//!
//! Low-level packet handling and framing.
//!
//! ## Components
//! - **Packet**: RCON wire layout, encode and field decoding
//! - **Codec**: Tokio codec for framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Size(4)] [Id(4)] [Type(4)] [Body(N)] [0x00 0x00]
//! ```
//! All integers are little-endian `i32`; `Size = N + 10`.
//!
//! ## Limits
//! - Outgoing packets are capped at a size of 4096 and rejected, never
//!   truncated, above it
//! - Inbound declared sizes are validated before allocation
pub mod codec;
pub mod packet;
