//! Error types for the audit pipeline
//!
//! Errors surface only from construction paths (configuration loading, pool
//! creation, sink setup) and from collaborator trait methods. The request path
//! logs and swallows them so auditing never changes the audited response.

use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the audit pipeline
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Redis error
    #[cfg(feature = "cache")]
    #[error("Redis error: {0}")]
    Redis(Box<redis::RedisError>),

    /// Counter store unreachable or misbehaving
    #[error("Counter store error: {0}")]
    CounterStore(String),

    /// A log sink rejected a write
    #[error("Sink '{channel}' failed: {message}")]
    Sink {
        /// Channel the write was addressed to
        channel: String,
        /// Underlying failure
        message: String,
    },

    /// Notification transport failure
    #[error("Notification error: {0}")]
    Notification(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a sink error for the named channel
    pub fn sink(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

#[cfg(feature = "cache")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Redis(Box::new(err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Notification(err.to_string())
    }
}
