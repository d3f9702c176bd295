//! Media engine interface
//!
//! The registry never touches packets. Every media-plane action (allocating
//! ports, forwarding RTP, DTLS handshakes) is delegated to a [`MediaEngine`];
//! asynchronous happenings inside the engine come back as [`EngineEvent`]s on
//! a channel the engine hands out at construction.

pub mod loopback;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::media::{ConsumerLayers, MediaKind, RtpCapabilities, RtpParameters};
use crate::registry::ids::{ConsumerId, DataConsumerId, DataProducerId, ProducerId, TransportId};
use crate::transport::{
    Direction, DtlsParameters, LinkState, SctpStreamParameters, TransportOptions,
    TransportParameters,
};

pub use loopback::{LoopbackConfig, LoopbackEngine};

/// Error returned by the media engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine refused the operation
    #[error("{0}")]
    Rejected(String),

    /// The referenced engine-side object does not exist
    #[error("unknown {0}")]
    Unknown(String),

    #[error("media engine is closed")]
    Closed,
}

/// Engine-side object to release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineResource {
    Transport(TransportId),
    Producer(ProducerId),
    Consumer(ConsumerId),
    DataProducer(DataProducerId),
    DataConsumer(DataConsumerId),
}

/// Delivery quality of a consumer, 0 (worst) to 10 (best)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScore {
    /// Score of the stream sent to the consuming endpoint
    pub score: u8,
    /// Score of the producer stream being forwarded
    pub producer_score: u8,
}

/// Asynchronous event raised by the media engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    IceStateChanged {
        transport_id: TransportId,
        state: LinkState,
    },
    DtlsStateChanged {
        transport_id: TransportId,
        state: LinkState,
    },
    SctpStateChanged {
        transport_id: TransportId,
        state: LinkState,
    },
    ProducerScore {
        producer_id: ProducerId,
        score: u8,
    },
    ConsumerScore {
        consumer_id: ConsumerId,
        score: ConsumerScore,
    },
    ConsumerLayersChanged {
        consumer_id: ConsumerId,
        layers: Option<ConsumerLayers>,
    },
    /// A data channel message was delivered to a data consumer
    DataMessage {
        data_consumer_id: DataConsumerId,
        payload: Bytes,
    },
    /// The engine process is gone; every resource it held is lost
    Died { reason: String },
}

/// Media-plane backend driven by the registry
///
/// Creation calls receive the id the registry allocated so that engine-side
/// objects and registry entries share identity. `close` is fire-and-forget:
/// failures are reported but never stop a teardown cascade.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Codecs and header extensions the router can forward
    fn rtp_capabilities(&self) -> RtpCapabilities;

    async fn create_transport(
        &self,
        id: TransportId,
        direction: Direction,
        options: &TransportOptions,
    ) -> Result<TransportParameters, EngineError>;

    async fn connect_transport(
        &self,
        id: TransportId,
        dtls: &DtlsParameters,
    ) -> Result<(), EngineError>;

    async fn produce(
        &self,
        transport_id: TransportId,
        producer_id: ProducerId,
        kind: MediaKind,
        rtp_parameters: &RtpParameters,
    ) -> Result<(), EngineError>;

    async fn pause_producer(&self, id: ProducerId) -> Result<(), EngineError>;

    async fn resume_producer(&self, id: ProducerId) -> Result<(), EngineError>;

    async fn consume(
        &self,
        transport_id: TransportId,
        consumer_id: ConsumerId,
        producer_id: ProducerId,
        rtp_parameters: &RtpParameters,
        paused: bool,
    ) -> Result<(), EngineError>;

    async fn pause_consumer(&self, id: ConsumerId) -> Result<(), EngineError>;

    async fn resume_consumer(&self, id: ConsumerId) -> Result<(), EngineError>;

    async fn set_preferred_layers(
        &self,
        id: ConsumerId,
        layers: Option<ConsumerLayers>,
    ) -> Result<(), EngineError>;

    async fn set_priority(&self, id: ConsumerId, priority: u32) -> Result<(), EngineError>;

    async fn produce_data(
        &self,
        transport_id: TransportId,
        data_producer_id: DataProducerId,
        sctp_stream_parameters: &SctpStreamParameters,
    ) -> Result<(), EngineError>;

    /// Returns the SCTP stream parameters assigned to the new data consumer
    async fn consume_data(
        &self,
        transport_id: TransportId,
        data_consumer_id: DataConsumerId,
        data_producer_id: DataProducerId,
    ) -> Result<SctpStreamParameters, EngineError>;

    /// Release an engine-side object
    fn close(&self, resource: EngineResource) -> Result<(), EngineError>;
}
