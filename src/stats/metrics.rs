//! Statistics for sessions and the relay as a whole

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::registry::ids::SessionId;

/// Per-session resource counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: SessionId,
    pub transports: usize,
    pub producers: usize,
    pub consumers: usize,
    pub data_producers: usize,
    pub data_consumers: usize,
    /// Connection duration
    #[serde(serialize_with = "as_millis")]
    pub duration: Duration,
}

impl SessionStats {
    pub fn is_producing(&self) -> bool {
        self.producers > 0 || self.data_producers > 0
    }

    pub fn is_consuming(&self) -> bool {
        self.consumers > 0 || self.data_consumers > 0
    }
}

/// Point-in-time view of everything the registry holds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub sessions: usize,
    pub transports: usize,
    /// Transports with both ICE and DTLS connected
    pub connected_transports: usize,
    pub producers: usize,
    pub paused_producers: usize,
    pub consumers: usize,
    pub paused_consumers: usize,
    pub data_producers: usize,
    pub data_consumers: usize,
    /// Mean delivery score over consumers that reported one
    pub average_consumer_score: Option<f32>,
}

impl StatusSnapshot {
    /// Total number of live resources, sessions excluded
    pub fn resources(&self) -> usize {
        self.transports + self.producers + self.consumers + self.data_producers + self.data_consumers
    }
}

/// Server-wide connection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Current active connections
    pub active_connections: u64,
    /// Connections refused by the connection limit
    pub rejected_connections: u64,
    #[serde(serialize_with = "as_millis")]
    pub uptime: Duration,
}

/// Lock-free counters behind [`ServerStats`]
#[derive(Debug)]
pub struct ConnectionCounters {
    started_at: Instant,
    total: AtomicU64,
    active: AtomicU64,
    rejected: AtomicU64,
}

impl ConnectionCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total: AtomicU64::new(0),
            active: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn opened(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn closed(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total.load(Ordering::Relaxed),
            active_connections: self.active.load(Ordering::Relaxed),
            rejected_connections: self.rejected.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for ConnectionCounters {
    fn default() -> Self {
        Self::new()
    }
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
}
