//! Session state
//!
//! Tracks what one signaling connection owns and how to reach it. Ownership
//! here is the authority for every "does this session own X" check.

use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::media::RtpCapabilities;
use crate::protocol::message::Notification;
use crate::registry::ids::{ConsumerId, DataConsumerId, DataProducerId, ProducerId, SessionId, TransportId};
use crate::stats::SessionStats;

/// Push channel towards one session
pub type NotificationSender = mpsc::UnboundedSender<Notification>;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Connected and accepting requests
    Active,
    /// Teardown in progress
    Closing,
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: SessionId,

    /// Current phase
    pub phase: SessionPhase,

    /// Connection start time
    pub connected_at: Instant,

    /// Capabilities last declared by this session when consuming
    pub rtp_capabilities: Option<RtpCapabilities>,

    pub transports: HashSet<TransportId>,
    pub producers: HashSet<ProducerId>,
    pub consumers: HashSet<ConsumerId>,
    pub data_producers: HashSet<DataProducerId>,
    pub data_consumers: HashSet<DataConsumerId>,

    notifier: NotificationSender,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: SessionId, notifier: NotificationSender) -> Self {
        Self {
            id,
            phase: SessionPhase::Active,
            connected_at: Instant::now(),
            rtp_capabilities: None,
            transports: HashSet::new(),
            producers: HashSet::new(),
            consumers: HashSet::new(),
            data_producers: HashSet::new(),
            data_consumers: HashSet::new(),
            notifier,
        }
    }

    /// Push a notification
    ///
    /// Returns `false` if the connection is already gone; that is not an error.
    pub fn notify(&self, notification: Notification) -> bool {
        if self.phase != SessionPhase::Active {
            return false;
        }
        self.notifier.send(notification).is_ok()
    }

    /// Check if session is active
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    /// Start closing the session
    pub fn close(&mut self) {
        self.phase = SessionPhase::Closing;
    }

    /// Get session duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    pub fn is_producing(&self) -> bool {
        !self.producers.is_empty() || !self.data_producers.is_empty()
    }

    pub fn is_consuming(&self) -> bool {
        !self.consumers.is_empty() || !self.data_consumers.is_empty()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id,
            transports: self.transports.len(),
            producers: self.producers.len(),
            consumers: self.consumers.len(),
            data_producers: self.data_producers.len(),
            data_consumers: self.data_consumers.len(),
            duration: self.duration(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::ConsumerRef;

    #[test]
    fn test_session_lifecycle() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = SessionState::new(SessionId(1), tx);
        assert!(state.is_active());
        assert!(!state.is_producing());

        let note = Notification::ConsumerPaused(ConsumerRef {
            consumer_id: ConsumerId::new(),
        });
        assert!(state.notify(note.clone()));
        assert_eq!(rx.try_recv().unwrap(), note);

        state.close();
        assert!(!state.is_active());
        assert!(!state.notify(note));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notify_after_disconnect() {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = SessionState::new(SessionId(2), tx);
        drop(rx);

        let note = Notification::ConsumerResumed(ConsumerRef {
            consumer_id: ConsumerId::new(),
        });
        assert!(!state.notify(note));
    }

    #[test]
    fn test_stats_counts() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = SessionState::new(SessionId(3), tx);
        state.transports.insert(TransportId::new());
        state.producers.insert(ProducerId::new());

        let stats = state.stats();
        assert_eq!(stats.transports, 1);
        assert_eq!(stats.producers, 1);
        assert!(stats.is_producing());
        assert!(!stats.is_consuming());
    }
}
