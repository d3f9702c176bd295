//! Error types
//!
//! Each layer has its own error enum; [`Error`] wraps them for callers that
//! drive the whole stack (the server loop, the demos).

use crate::registry::RegistryError;

/// Result alias used by the server and framing layers
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// The media engine process is gone; the relay must not keep running
    #[error("media engine died: {0}")]
    EngineDied(String),
}

/// Signaling framing and encoding errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },
}

/// Errors seen by the client side of the signaling channel
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server never answered within the request timeout
    #[error("{method} timed out after {timeout_ms} ms")]
    Timeout { method: &'static str, timeout_ms: u64 },

    #[error("signaling channel disconnected")]
    Disconnected,

    /// The server answered with an error
    #[error("{code}: {message}")]
    Server { code: String, message: String },

    #[error("unexpected response to {method}: {got}")]
    UnexpectedResponse { method: &'static str, got: String },

    /// A local precondition is missing (no transport yet, capabilities not loaded)
    #[error("not ready: {0}")]
    NotReady(String),
}

impl ClientError {
    /// Error code reported by the server, if this is a server-side error
    pub fn server_code(&self) -> Option<&str> {
        match self {
            ClientError::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}
