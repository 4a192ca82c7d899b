//! # Configuration
//!
//! Settings for both RCON endpoints and for log output.
//!
//! Durations are written in milliseconds wherever configuration is
//! serialized, so `heartbeat_interval = 30000` means thirty seconds.
//!
//! ## Sources
//! - TOML via [`NetworkConfig::from_file`] and [`NetworkConfig::from_toml`]
//! - `RCON_*` environment variables via [`NetworkConfig::from_env`]
//! - Struct literals over [`Default`]
//!
//! ## Security
//! - RCON sends the password in clear text; bind servers to trusted interfaces
//! - The receive timeout bounds how long a silent peer can hold a worker

use crate::core::packet::{MAX_PACKET_SIZE, MAX_RESPONSE_SIZE, MIN_PACKET_SIZE};
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default RCON port used by Source dedicated servers
pub const DEFAULT_PORT: u16 = 27015;

/// Everything a host process may configure, one section per concern.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse TOML; missing sections fall back to their defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by whichever `RCON_*` variables are set.
    ///
    /// `RCON_TIMEOUT_MS` sets both client timeouts.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = env_string("RCON_SERVER_ADDRESS") {
            config.server.address = addr;
        }
        if let Some(password) = env_string("RCON_SERVER_PASSWORD") {
            config.server.password = password;
        }
        if let Some(addr) = env_string("RCON_CLIENT_ADDRESS") {
            config.client.address = addr;
        }
        if let Some(password) = env_string("RCON_CLIENT_PASSWORD") {
            config.client.password = password;
        }
        if let Some(timeout) = env_millis("RCON_TIMEOUT_MS")? {
            config.client.connection_timeout = timeout;
            config.client.receive_timeout = timeout;
        }
        if let Some(interval) = env_millis("RCON_HEARTBEAT_INTERVAL_MS")? {
            config.server.heartbeat_interval = interval;
        }

        Ok(config)
    }

    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// The default configuration rendered as TOML.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to render TOML: {e}")))?;
        std::fs::write(path, content).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot write {}: {e}", path.display()))
        })
    }

    /// Every problem found across all sections; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        self.server
            .validate()
            .into_iter()
            .chain(self.client.validate())
            .chain(self.logging.validate())
            .collect()
    }

    pub fn validate_strict(&self) -> Result<()> {
        strict(self.validate())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ProtocolError::ConfigError(format!("{key} is not a number: {raw}"))),
        Err(_) => Ok(None),
    }
}

fn strict(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

fn validate_address(kind: &str, address: &str, errors: &mut Vec<String>) {
    if address.is_empty() {
        errors.push(format!("{kind} address cannot be empty"));
    } else if address.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "Invalid {} address format: '{address}' (expected 'ip:port' with port 0-65535)",
            kind.to_lowercase()
        ));
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:27015")
    pub address: String,

    /// Password clients must send in their auth packet
    pub password: String,

    /// Silence on an authenticated connection before a keep-alive is sent
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,

    /// How long a connection worker waits for a frame before re-checking
    /// liveness and shutdown
    #[serde(with = "duration_serde")]
    pub poll_interval: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Largest inbound size field accepted before the connection is dropped
    pub max_packet_size: usize,

    /// Whether `start(false)` also returns on Ctrl-C
    #[serde(default)]
    pub shutdown_on_ctrl_c: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            password: String::new(),
            heartbeat_interval: timeout::HEARTBEAT_INTERVAL,
            poll_interval: timeout::POLL_INTERVAL,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_connections: 1000,
            max_packet_size: MAX_PACKET_SIZE,
            shutdown_on_ctrl_c: false,
        }
    }
}

impl ServerConfig {
    /// Convenience constructor for the two settings every server needs.
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_address("Server", &self.address, &mut errors);

        if self.poll_interval.as_millis() < 1 {
            errors.push("Poll interval too short (minimum: 1ms)".to_string());
        } else if self.poll_interval.as_secs() > 10 {
            errors.push("Poll interval too long (maximum: 10s)".to_string());
        }

        if self.heartbeat_interval < self.poll_interval {
            errors.push("Heartbeat interval cannot be shorter than the poll interval".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        if self.shutdown_timeout.as_millis() < 100 {
            errors.push("Shutdown timeout too short (minimum: 100ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        if self.max_packet_size < MIN_PACKET_SIZE as usize {
            errors.push(format!(
                "Max packet size too small: {} (minimum: {MIN_PACKET_SIZE})",
                self.max_packet_size
            ));
        } else if self.max_packet_size > MAX_PACKET_SIZE {
            errors.push(format!(
                "Max packet size too large: {} (maximum: {MAX_PACKET_SIZE})",
                self.max_packet_size
            ));
        }

        errors
    }

    pub fn validate_strict(&self) -> Result<()> {
        strict(self.validate())
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address (IP and port, not a host name)
    pub address: String,

    /// Password sent in the auth packet
    pub password: String,

    /// Timeout for the connect attempt
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Timeout applied to every framed read
    #[serde(with = "duration_serde")]
    pub receive_timeout: Duration,

    /// Reads (frames or timeouts) spent looking for a matching response
    pub max_receive_retries: u32,

    /// Largest inbound size field accepted before the connection is dropped
    #[serde(default = "default_max_response_size")]
    pub max_packet_size: usize,
}

fn default_max_response_size() -> usize {
    MAX_RESPONSE_SIZE
}

/// Upper bound on `ClientConfig::max_packet_size`.
const MAX_CLIENT_FRAME: usize = 1 << 20;

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_PORT}"),
            password: String::new(),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            receive_timeout: timeout::DEFAULT_TIMEOUT,
            max_receive_retries: timeout::MAX_RETRIES_TO_RECEIVE,
            max_packet_size: MAX_RESPONSE_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new(address: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_address("Client", &self.address, &mut errors);

        if self.connection_timeout.as_millis() < 10 {
            errors.push("Connection timeout too short (minimum: 10ms)".to_string());
        }

        if self.receive_timeout.as_millis() < 10 {
            errors.push("Receive timeout too short (minimum: 10ms)".to_string());
        }

        if self.max_receive_retries == 0 {
            errors.push("Max receive retries must be greater than 0".to_string());
        }

        if !(MIN_PACKET_SIZE as usize..=MAX_CLIENT_FRAME).contains(&self.max_packet_size) {
            errors.push(format!(
                "Client max packet size out of range: {} (allowed: {MIN_PACKET_SIZE}..={MAX_CLIENT_FRAME})",
                self.max_packet_size
            ));
        }

        errors
    }

    pub fn validate_strict(&self) -> Result<()> {
        strict(self.validate())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("rcon-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Durations as whole milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Levels as lowercase names (`"info"`, `"debug"`).
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
