//! Registry error types
//!
//! Error types for resource registry operations. Every variant maps to a
//! stable error code that is sent back to the requesting session.

use crate::registry::ids::{ResourceKind, TransportId};
use crate::transport::Direction;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Resource does not exist or is not owned by the requester
    NotFound { kind: ResourceKind, id: String },
    /// Operation not allowed in the resource's current state
    InvalidState(String),
    /// Transport exists but points the wrong way for this operation
    InvalidDirection {
        transport_id: TransportId,
        direction: Direction,
    },
    /// No codec in common between a producer and the consuming side
    IncompatibleCapabilities(String),
    /// Id collision on registration
    DuplicateId { kind: ResourceKind, id: String },
    /// The session already consumes (or is creating a consumer for) this source
    AlreadyConsuming(String),
    /// Requested layer is outside what the producer sends
    InvalidLayer(String),
    /// Malformed request parameters
    InvalidParameters(String),
    /// The media engine did not answer in time
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    /// The media engine rejected the operation
    Engine(String),
}

impl RegistryError {
    pub(crate) fn not_found(kind: ResourceKind, id: impl std::fmt::Display) -> Self {
        RegistryError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::NotFound { .. } => "not-found",
            RegistryError::InvalidState(_) => "invalid-state",
            RegistryError::InvalidDirection { .. } => "invalid-direction",
            RegistryError::IncompatibleCapabilities(_) => "incompatible-capabilities",
            RegistryError::DuplicateId { .. } => "duplicate-id",
            RegistryError::AlreadyConsuming(_) => "already-consuming",
            RegistryError::InvalidLayer(_) => "invalid-layer",
            RegistryError::InvalidParameters(_) => "invalid-parameters",
            RegistryError::Timeout { .. } => "timeout",
            RegistryError::Engine(_) => "engine-error",
        }
    }
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            RegistryError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            RegistryError::InvalidDirection {
                transport_id,
                direction,
            } => write!(f, "Transport {} is a {} transport", transport_id, direction),
            RegistryError::IncompatibleCapabilities(msg) => {
                write!(f, "Incompatible capabilities: {}", msg)
            }
            RegistryError::DuplicateId { kind, id } => write!(f, "{} already exists: {}", kind, id),
            RegistryError::AlreadyConsuming(id) => write!(f, "Already consuming {}", id),
            RegistryError::InvalidLayer(msg) => write!(f, "Invalid layer: {}", msg),
            RegistryError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            RegistryError::Timeout {
                operation,
                timeout_ms,
            } => write!(f, "{} timed out after {} ms", operation, timeout_ms),
            RegistryError::Engine(msg) => write!(f, "Media engine error: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}
