//! # Transport Layer
//!
//! TCP primitives (connect, bind, framed read/write) and socket error
//! classification.

pub mod classify;
pub mod tcp;

pub use classify::{classify, SocketErrorClass};
pub use tcp::{FrameRead, RconFramed};
