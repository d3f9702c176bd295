//! Resource registry
//!
//! The registry is the single source of truth for which sessions exist, which
//! media resources they own and which resources depend on which:
//!
//! ```text
//!   Session ──owns──► Transport ──hosts──► Producer ──feeds──► Consumer
//!                         │                                      ▲
//!                         └──hosts──► DataProducer ──feeds──► DataConsumer
//! ```
//!
//! Every mutation and the cascade it triggers happen under one write guard.
//! Closing a host closes its dependents first, in [`TEARDOWN_ORDER`].

pub mod config;
pub mod entry;
pub mod error;
pub mod ids;
pub mod store;

mod data;
mod discovery;
mod events;
mod media;

pub use config::RegistryConfig;
pub use entry::CloseCause;
pub use error::RegistryError;
pub use events::EngineStatus;
pub use ids::{ConsumerId, DataConsumerId, DataProducerId, ProducerId, ResourceKind, SessionId, TransportId};
pub use store::{ResourceRegistry, TEARDOWN_ORDER};
