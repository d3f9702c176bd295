//! Registry entry types
//!
//! One entry per live resource. Entries record their owner session and host
//! transport; hosts additionally record their dependents so a teardown can
//! walk downwards without scanning the whole table.

use std::collections::HashSet;
use std::time::Instant;

use crate::engine::ConsumerScore;
use crate::media::{ConsumerLayers, MediaKind, RtpParameters};
use crate::protocol::message::{ConsumerInfo, DataConsumerInfo, DataProducerInfo, ProducerInfo};
use crate::transport::{Direction, SctpStreamParameters, TransportNegotiation, TransportParameters};

use super::ids::{ConsumerId, DataConsumerId, DataProducerId, ProducerId, SessionId, TransportId};

/// Why a resource is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// The owner asked for it
    Requested,
    /// Its host transport closed
    TransportClosed,
    /// The producer it consumes closed
    ProducerClosed,
    /// The owning session went away
    SessionClosed,
}

pub struct TransportEntry {
    pub id: TransportId,
    pub session_id: SessionId,
    pub direction: Direction,
    pub parameters: TransportParameters,
    pub negotiation: TransportNegotiation,
    pub producers: HashSet<ProducerId>,
    pub consumers: HashSet<ConsumerId>,
    pub data_producers: HashSet<DataProducerId>,
    pub data_consumers: HashSet<DataConsumerId>,
}

impl TransportEntry {
    pub(super) fn new(session_id: SessionId, direction: Direction, parameters: TransportParameters) -> Self {
        let negotiation = TransportNegotiation::new(parameters.sctp_parameters.is_some());
        Self {
            id: parameters.id,
            session_id,
            direction,
            parameters,
            negotiation,
            producers: HashSet::new(),
            consumers: HashSet::new(),
            data_producers: HashSet::new(),
            data_consumers: HashSet::new(),
        }
    }

    pub fn sctp_enabled(&self) -> bool {
        self.parameters.sctp_parameters.is_some()
    }
}

pub struct ProducerEntry {
    pub id: ProducerId,
    pub session_id: SessionId,
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
    pub score: Option<u8>,
    pub consumers: HashSet<ConsumerId>,
    pub created_at: Instant,
}

impl ProducerEntry {
    pub fn info(&self) -> ProducerInfo {
        ProducerInfo {
            producer_id: self.id,
            session_id: self.session_id,
            kind: self.kind,
        }
    }
}

pub struct ConsumerEntry {
    pub id: ConsumerId,
    pub session_id: SessionId,
    pub transport_id: TransportId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    /// Paused by the consuming session
    pub paused: bool,
    /// Paused because the producer is paused
    pub producer_paused: bool,
    pub preferred_layers: Option<ConsumerLayers>,
    pub current_layers: Option<ConsumerLayers>,
    pub priority: u32,
    pub score: Option<ConsumerScore>,
    pub created_at: Instant,
}

impl ConsumerEntry {
    pub fn info(&self) -> ConsumerInfo {
        ConsumerInfo {
            consumer_id: self.id,
            producer_id: self.producer_id,
            kind: self.kind,
            rtp_parameters: self.rtp_parameters.clone(),
            paused: self.paused,
            producer_paused: self.producer_paused,
        }
    }
}

pub struct DataProducerEntry {
    pub id: DataProducerId,
    pub session_id: SessionId,
    pub transport_id: TransportId,
    pub sctp_stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
    pub data_consumers: HashSet<DataConsumerId>,
    pub created_at: Instant,
}

impl DataProducerEntry {
    pub fn info(&self) -> DataProducerInfo {
        DataProducerInfo {
            data_producer_id: self.id,
            session_id: self.session_id,
            label: self.label.clone(),
            protocol: self.protocol.clone(),
        }
    }
}

pub struct DataConsumerEntry {
    pub id: DataConsumerId,
    pub session_id: SessionId,
    pub transport_id: TransportId,
    pub data_producer_id: DataProducerId,
    pub sctp_stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
}

impl DataConsumerEntry {
    pub fn info(&self) -> DataConsumerInfo {
        DataConsumerInfo {
            data_consumer_id: self.id,
            data_producer_id: self.data_producer_id,
            sctp_stream_parameters: self.sctp_stream_parameters.clone(),
            label: self.label.clone(),
            protocol: self.protocol.clone(),
        }
    }
}
