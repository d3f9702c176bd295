//! WebRTC transport negotiation
//!
//! Parameter sets exchanged with clients and the per-transport ICE/DTLS
//! state machine.

pub mod params;
pub mod state;

pub use params::{
    Direction, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters,
    NumSctpStreams, SctpParameters, SctpStreamParameters, TransportOptions, TransportParameters,
    TransportProtocol,
};
pub use state::{Layer, LinkState, PhaseChange, TransportNegotiation, TransportPhase, TransportStateError};
