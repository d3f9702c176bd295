//! sfu-rs: signaling and resource lifecycle for a multi-party media relay
//!
//! Clients join over a newline-delimited JSON signaling channel, negotiate a
//! send and a receive WebRTC transport, publish media as producers and
//! subscribe to other participants' producers as consumers. The relay keeps
//! the authoritative registry of who owns what and tears everything down in
//! dependency order when a participant leaves. Packet forwarding itself is
//! delegated to a [`MediaEngine`](engine::MediaEngine).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sfu_rs::engine::LoopbackEngine;
//! use sfu_rs::{ResourceRegistry, ServerConfig, SignalServer};
//!
//! #[tokio::main]
//! async fn main() -> sfu_rs::Result<()> {
//!     let (engine, events) = LoopbackEngine::new();
//!     let registry = Arc::new(ResourceRegistry::new(Arc::new(engine)));
//!     let server = SignalServer::new(ServerConfig::default(), registry, events);
//!     server.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await
//! }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

pub use client::{ClientConfig, LocalSignaler, MirrorEvent, NegotiationMirror, SignalClient, Signaler};
pub use error::{ClientError, Error, Result};
pub use registry::{RegistryConfig, RegistryError, ResourceRegistry};
pub use server::{ServerConfig, SignalServer};
pub use session::SignalHandler;
