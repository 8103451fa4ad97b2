use std::io;
use thiserror::Error;

/// Error type for the Hyper-V agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unable to connect to Hyper-V host '{host}': {message}")]
    Connection { host: String, message: String },

    #[error("Virtual system management service not found on '{0}'")]
    ServiceNotFound(String),

    #[error("Management query failed: {0}")]
    Query(String),

    #[error("Platform not supported: {0}")]
    Platform(String),

    #[error("Metric delivery failed: {0}")]
    Delivery(String),
}

/// Result type alias for the agent
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Create a connection error for `host`
    pub fn connection<H: Into<String>, S: Into<String>>(host: H, msg: S) -> Self {
        AgentError::Connection {
            host: host.into(),
            message: msg.into(),
        }
    }

    pub fn service_not_found<H: Into<String>>(host: H) -> Self {
        AgentError::ServiceNotFound(host.into())
    }

    pub fn query<S: Into<String>>(msg: S) -> Self {
        AgentError::Query(msg.into())
    }

    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        AgentError::Config(msg.into())
    }

    pub fn platform<S: Into<String>>(msg: S) -> Self {
        AgentError::Platform(msg.into())
    }

    pub fn delivery<S: Into<String>>(msg: S) -> Self {
        AgentError::Delivery(msg.into())
    }

    /// Whether this error ends the whole poll cycle rather than a single VM.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::Connection { .. } | AgentError::ServiceNotFound(_)
        )
    }
}
