//! Relay statistics

pub mod metrics;

pub use metrics::{ConnectionCounters, ServerStats, SessionStats, StatusSnapshot};
