// Hyper-V Agent Library - Public API

// Re-export error types
pub mod error;
pub use error::{AgentError, Result};

// Module declarations
pub mod core;
pub mod platform;

// Re-export commonly used types
pub use crate::core::agent::{Agent, HyperVAgent};
pub use crate::core::config::AgentConfig;

// Initialize logging
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
