//! Signaling server
//!
//! Accepts newline-delimited JSON connections, one session per connection.

pub mod config;
pub mod connection;
pub mod listener;

pub use config::ServerConfig;
pub use connection::Connection;
pub use listener::SignalServer;
