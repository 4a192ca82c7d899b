//! # Utility Modules
//!
//! Supporting utilities for logging, timing and observability.
//!
//! ## Components
//! - **Logging**: Subscriber setup and the host log hook
//! - **Timeout**: Protocol timing constants and async timeout wrappers
//! - **Metrics**: Thread-safe observability counters

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use logging::{EventLog, LogHook};
pub use metrics::{Metrics, MetricsSnapshot};
