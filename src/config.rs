//! Server configuration
//!
//! All knobs are fixed at startup; nothing here changes while the server
//! is running.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::MismatchPolicy;

/// Default bind address (all interfaces)
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
/// Default listening port
pub const DEFAULT_PORT: u16 = 8080;

/// Configuration for the inference server, immutable after startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listening socket to
    pub bind_addr: String,
    /// Port to listen on
    pub port: u16,
    /// Path to the model file; None runs the server in simulated mode
    pub model_path: Option<PathBuf>,
    /// Maximum concurrent connection workers; connections past this are
    /// rejected without a response
    pub max_connections: usize,
    /// Per-connection read/write deadline
    pub io_timeout: Duration,
    /// How long shutdown waits for in-flight workers before abandoning them
    pub drain_timeout: Duration,
    /// What to do when a request buffer does not match the model input shape
    pub mismatch_policy: MismatchPolicy,
    /// Output elements produced per request in simulated mode
    pub simulated_output_elems: usize,
    /// Artificial processing delay in simulated mode
    pub simulated_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            port: DEFAULT_PORT,
            model_path: None,
            max_connections: 64,
            io_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
            mismatch_policy: MismatchPolicy::BestEffortReinterpret,
            simulated_output_elems: 1000,
            simulated_delay: Duration::from_millis(100),
        }
    }
}

/// Errors from command-line argument parsing
#[derive(Debug)]
pub enum ConfigError {
    /// Port argument was not a valid u16
    InvalidPort(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort(arg) => write!(f, "invalid port: {}", arg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ServerConfig {
    /// Parse optional positional arguments: `[model_path] [port]`.
    ///
    /// Omitting the model path starts the server in simulated mode.
    pub fn from_args<I>(mut args: I) -> Result<Self, ConfigError>
    where
        I: Iterator<Item = String>,
    {
        let mut config = ServerConfig::default();

        if let Some(path) = args.next() {
            config.model_path = Some(PathBuf::from(path));
        }
        if let Some(port) = args.next() {
            config.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }

        Ok(config)
    }

    /// Socket address string for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}
