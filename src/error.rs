//! SeedPilot Error Types

use thiserror::Error;

/// Result type alias for SeedPilot operations
pub type Result<T> = std::result::Result<T, Error>;

/// SeedPilot error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Coordination store errors
    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("Coordination store returned {status}: {body}")]
    StoreStatus { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    // Election errors
    #[error("Seed election failed: {0}")]
    Election(String),

    // Node identity errors
    #[error("Identity error: {0}")]
    Identity(String),

    // Clustered service errors
    #[error("Service configuration error: {0}")]
    ServiceConfig(String),

    #[error("Service error: {0}")]
    Service(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Dispatch errors
    #[error("Invalid command: {0}")]
    UnknownCommand(String),
}

impl Error {
    /// Check if this error means the presented session no longer exists
    pub fn is_invalid_session(&self) -> bool {
        matches!(self, Error::InvalidSession(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::InvalidSession("abc".into()).is_invalid_session());
        assert!(!Error::Store("down".into()).is_invalid_session());
    }

    #[test]
    fn test_error_display() {
        let err = Error::UnknownCommand("restart".into());
        assert_eq!(err.to_string(), "Invalid command: restart");

        let err = Error::StoreStatus { status: 500, body: "boom".into() };
        assert_eq!(err.to_string(), "Coordination store returned 500: boom");
    }
}
