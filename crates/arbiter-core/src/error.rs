//! Error types for Arbiter core.

use thiserror::Error;

/// Core error type for Arbiter operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid policy config: {0}")]
    InvalidConfig(String),

    #[error("Missing {what} for session {session_id}")]
    MissingDependency { session_id: u32, what: &'static str },
}

impl Error {
    /// Shorthand for a missing external lookup during arbitration.
    #[must_use]
    pub fn missing(session_id: u32, what: &'static str) -> Self {
        Self::MissingDependency { session_id, what }
    }
}

/// Result type alias for Arbiter core operations.
pub type Result<T> = std::result::Result<T, Error>;
