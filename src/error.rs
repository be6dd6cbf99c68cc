//! Error types for the server.
//!
//! `ServerError` is the single error that reaches the top of the reactor.
//! Every variant is fatal: the caller closes the device and exits. Protocol
//! mistakes by the client never become errors; they are logged and dropped
//! inside the dispatcher.
//!
//! ## Error Hierarchy
//!
//! - **`Hardware`**: any non-success status from the driver. Device state is
//!   undefined afterwards, so nothing is retried.
//! - **`Bind`** / **`Accept`**: the listening sockets could not be set up or
//!   stopped working.
//! - **`Config`** / **`Configuration`**: the configuration could not be loaded
//!   or failed validation.
//! - **`Telemetry`**: the tracing subscriber could not be installed.

use std::net::SocketAddr;
use thiserror::Error;

use crate::hardware::driver::ScopeError;

/// Convenience alias for results using the server error type.
pub type ServerResult<T> = std::result::Result<T, ServerError>;

/// Fatal conditions that stop the server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] ScopeError),

    #[error("Failed to bind {role} listener on {addr}: {source}")]
    Bind {
        role: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept {role} connection: {source}")]
    Accept {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Tracing setup failed: {0}")]
    Telemetry(String),
}

impl ServerError {
    /// Driver status behind a hardware error, if any.
    pub fn scope_error(&self) -> Option<&ScopeError> {
        match self {
            ServerError::Hardware(err) => Some(err),
            _ => None,
        }
    }
}

impl From<figment::Error> for ServerError {
    fn from(value: figment::Error) -> Self {
        ServerError::Config(Box::new(value))
    }
}
