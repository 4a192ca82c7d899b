//! Logging setup and the host log hook.
//!
//! All diagnostics go through `tracing`. Hosts that want the plain-text
//! event stream as well (the classic `on_log` callback) install a
//! [`LogHook`]; [`EventLog`] forwards every event to both.

use std::fmt;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Host callback receiving every diagnostic line. Must not block.
pub type LogHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Emits an event to `tracing` and, if present, to the host hook.
#[derive(Clone, Default)]
pub struct EventLog {
    hook: Option<LogHook>,
}

impl EventLog {
    pub fn new(hook: Option<LogHook>) -> Self {
        Self { hook }
    }

    pub fn emit(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!("{message}"),
            Level::WARN => tracing::warn!("{message}"),
            Level::INFO => tracing::info!("{message}"),
            Level::DEBUG => tracing::debug!("{message}"),
            Level::TRACE => tracing::trace!("{message}"),
        }
        if let Some(hook) = &self.hook {
            hook(message);
        }
    }

    pub fn info(&self, message: &str) {
        self.emit(Level::INFO, message);
    }

    pub fn warn(&self, message: &str) {
        self.emit(Level::WARN, message);
    }

    pub fn error(&self, message: &str) {
        self.emit(Level::ERROR, message);
    }

    pub fn debug(&self, message: &str) {
        self.emit(Level::DEBUG, message);
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLog")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Install a global `fmt` subscriber configured from `config`.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::info!(app = %config.app_name, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn hook_receives_every_event() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let log = EventLog::new(Some(Arc::new(move |line: &str| {
            if let Ok(mut lines) = sink.lock() {
                lines.push(line.to_string());
            }
        })));

        log.info("first");
        log.warn("second");

        let lines = lines.lock().map(|l| l.clone()).unwrap_or_default();
        assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn no_hook_is_fine() {
        EventLog::default().error("nobody listening");
    }
}
