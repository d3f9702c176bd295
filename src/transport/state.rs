//! Transport negotiation state machine
//!
//! A transport tracks its ICE and DTLS link states independently. It is only
//! usable for media once both report `Connected`; once either reports `Failed`
//! the transport is never repaired in place and must be replaced by a fresh one.
//!
//! ```text
//!              begin_connect()
//!   Created ──────────────────► Connecting ──► Connected
//!      │                            │              │
//!      └────────────┬───────────────┴──────────────┤
//!                   ▼                              ▼
//!                Failed ─────────────────────►  Closed
//! ```

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::params::DtlsParameters;

/// State of one link layer (ICE, DTLS or SCTP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl LinkState {
    /// Whether the link may move from `self` to `next`
    pub fn can_transition_to(self, next: LinkState) -> bool {
        use LinkState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Failed, _) => false,
            (New, Connecting | Connected | Failed) => true,
            (Connecting, Connected | Failed) => true,
            // ICE may drop back to checking on a network change
            (Connected, Connecting | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::New => "new",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Failed => "failed",
            LinkState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Link layer a state change refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Ice,
    Dtls,
    Sctp,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Ice => f.write_str("ice"),
            Layer::Dtls => f.write_str("dtls"),
            Layer::Sctp => f.write_str("sctp"),
        }
    }
}

/// Overall negotiation phase derived from the link states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportPhase {
    Created,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// Errors from driving the negotiation state machine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportStateError {
    #[error("transport already received its connect parameters")]
    AlreadyConnecting,

    #[error("transport is closed")]
    Closed,

    #[error("illegal {layer} transition {from} -> {to}")]
    IllegalTransition {
        layer: Layer,
        from: LinkState,
        to: LinkState,
    },
}

/// Result of applying a link state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    pub before: TransportPhase,
    pub after: TransportPhase,
}

impl PhaseChange {
    /// The transport just entered `Failed`
    pub fn became_failed(&self) -> bool {
        self.after == TransportPhase::Failed && self.before != TransportPhase::Failed
    }

    /// The transport just became usable for media
    pub fn became_connected(&self) -> bool {
        self.after == TransportPhase::Connected && self.before != TransportPhase::Connected
    }
}

/// Negotiation state of one transport
#[derive(Debug, Clone)]
pub struct TransportNegotiation {
    pub ice: LinkState,
    pub dtls: LinkState,
    /// `None` when the transport has no data channel association
    pub sctp: Option<LinkState>,
    /// Remote DTLS parameters, set once by the connect request
    pub remote_dtls: Option<DtlsParameters>,
    pub created_at: Instant,
    pub connected_at: Option<Instant>,
}

impl TransportNegotiation {
    pub fn new(sctp_enabled: bool) -> Self {
        Self {
            ice: LinkState::New,
            dtls: LinkState::New,
            sctp: sctp_enabled.then_some(LinkState::New),
            remote_dtls: None,
            created_at: Instant::now(),
            connected_at: None,
        }
    }

    /// Current negotiation phase
    pub fn phase(&self) -> TransportPhase {
        use LinkState::*;

        if self.ice == Closed || self.dtls == Closed {
            TransportPhase::Closed
        } else if self.ice == Failed || self.dtls == Failed {
            TransportPhase::Failed
        } else if self.ice == Connected && self.dtls == Connected {
            TransportPhase::Connected
        } else if self.remote_dtls.is_some() || self.ice == Connecting || self.dtls == Connecting {
            TransportPhase::Connecting
        } else {
            TransportPhase::Created
        }
    }

    /// Media may flow only when both ICE and DTLS are connected
    pub fn is_ready(&self) -> bool {
        self.phase() == TransportPhase::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == TransportPhase::Closed
    }

    /// Accept the remote DTLS parameters
    ///
    /// Allowed exactly once per transport.
    pub fn begin_connect(&mut self, remote: DtlsParameters) -> Result<(), TransportStateError> {
        if self.is_closed() {
            return Err(TransportStateError::Closed);
        }
        if self.remote_dtls.is_some() {
            return Err(TransportStateError::AlreadyConnecting);
        }

        self.remote_dtls = Some(remote);
        if self.dtls == LinkState::New {
            self.dtls = LinkState::Connecting;
        }
        Ok(())
    }

    /// Apply a link state change reported by the media engine
    ///
    /// Repeating the current state is a no-op.
    pub fn apply(&mut self, layer: Layer, next: LinkState) -> Result<PhaseChange, TransportStateError> {
        let before = self.phase();

        let slot = match layer {
            Layer::Ice => &mut self.ice,
            Layer::Dtls => &mut self.dtls,
            Layer::Sctp => match self.sctp.as_mut() {
                Some(slot) => slot,
                None => {
                    return Err(TransportStateError::IllegalTransition {
                        layer,
                        from: LinkState::Closed,
                        to: next,
                    })
                }
            },
        };

        if *slot != next {
            if !slot.can_transition_to(next) {
                return Err(TransportStateError::IllegalTransition {
                    layer,
                    from: *slot,
                    to: next,
                });
            }
            *slot = next;
        }

        let after = self.phase();
        if after == TransportPhase::Connected && self.connected_at.is_none() {
            self.connected_at = Some(Instant::now());
        }

        Ok(PhaseChange { before, after })
    }

    /// Close every layer
    pub fn close(&mut self) {
        self.ice = LinkState::Closed;
        self.dtls = LinkState::Closed;
        if let Some(sctp) = self.sctp.as_mut() {
            *sctp = LinkState::Closed;
        }
    }
}
