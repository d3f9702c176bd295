//! Signaling client
//!
//! Provides the client side of the signaling protocol:
//! - [`SignalClient`]: request/response correlation over TCP
//! - [`LocalSignaler`]: the same contract against an in-process registry
//! - [`NegotiationMirror`]: the client-side negotiation flow (join, produce,
//!   consume, reconcile notifications, recover failed transports)

pub mod config;
pub mod connector;
pub mod device;
pub mod local;
pub mod mirror;

use async_trait::async_trait;

use crate::error::ClientError;
use crate::protocol::message::{Request, ResponseBody};

pub use config::ClientConfig;
pub use connector::SignalClient;
pub use device::{LocalDevice, StaticDevice};
pub use local::LocalSignaler;
pub use mirror::{MirrorEvent, NegotiationMirror};

/// Request/response channel towards the server
#[async_trait]
pub trait Signaler: Send + Sync {
    /// Send one request and wait for its response
    async fn request(&self, request: Request) -> Result<ResponseBody, ClientError>;
}
