//! In-process media engine
//!
//! `LoopbackEngine` keeps the engine-side bookkeeping (ports, ids, SCTP stream
//! allocation) without moving any packets. Link state changes, scores and data
//! channel messages are raised on demand so that signaling flows can be driven
//! end to end in tests and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ConsumerScore, EngineError, EngineEvent, EngineResource, MediaEngine};
use crate::media::{
    default_media_codecs, router_capabilities, ConsumerLayers, MediaKind, RtpCapabilities,
    RtpCodecCapability, RtpParameters,
};
use crate::registry::ids::{ConsumerId, DataConsumerId, DataProducerId, ProducerId, TransportId};
use crate::transport::{
    Direction, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, LinkState,
    SctpParameters, SctpStreamParameters, TransportOptions, TransportParameters,
    TransportProtocol,
};

/// SCTP port advertised for every data channel association
const SCTP_PORT: u16 = 5000;

/// Loopback engine configuration
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Address placed in ICE candidates
    pub announced_ip: String,

    /// First port handed to a transport
    pub min_port: u16,

    /// Last port handed to a transport (wraps around)
    pub max_port: u16,

    /// Report ICE/DTLS as connected as soon as a transport is connected
    pub auto_connect: bool,

    /// Router codec table
    pub media_codecs: Vec<RtpCodecCapability>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            announced_ip: "127.0.0.1".to_string(),
            min_port: 40000,
            max_port: 49999,
            auto_connect: true,
            media_codecs: default_media_codecs(),
        }
    }
}

impl LoopbackConfig {
    pub fn announced_ip(mut self, ip: impl Into<String>) -> Self {
        self.announced_ip = ip.into();
        self
    }

    pub fn port_range(mut self, min: u16, max: u16) -> Self {
        self.min_port = min;
        self.max_port = max.max(min);
        self
    }

    /// Leave link states untouched after connect; tests drive them by hand
    pub fn manual_links(mut self) -> Self {
        self.auto_connect = false;
        self
    }
}

struct LoopTransport {
    direction: Direction,
    sctp: bool,
    next_stream_id: u16,
}

#[derive(Default)]
struct LoopbackState {
    next_port: u16,
    transports: HashMap<TransportId, LoopTransport>,
    producers: HashMap<ProducerId, (TransportId, bool)>,
    consumers: HashMap<ConsumerId, (ProducerId, bool)>,
    data_producers: HashMap<DataProducerId, TransportId>,
    data_consumers: HashMap<DataConsumerId, DataProducerId>,
    closed: Vec<EngineResource>,
}

/// Media engine that negotiates but never forwards media
pub struct LoopbackEngine {
    config: LoopbackConfig,
    capabilities: RtpCapabilities,
    state: Mutex<LoopbackState>,
    events: mpsc::UnboundedSender<EngineEvent>,
    alive: AtomicBool,
    stalled: AtomicBool,
}

impl LoopbackEngine {
    /// Create an engine with default configuration
    ///
    /// Returns the engine and the receiver for its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        Self::with_config(LoopbackConfig::default())
    }

    pub fn with_config(config: LoopbackConfig) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = LoopbackState {
            next_port: config.min_port,
            ..Default::default()
        };

        let engine = Self {
            capabilities: router_capabilities(config.media_codecs.clone()),
            config,
            state: Mutex::new(state),
            events: tx,
            alive: AtomicBool::new(true),
            stalled: AtomicBool::new(false),
        };

        (engine, rx)
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise an arbitrary engine event
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    /// Report an ICE failure on a transport
    pub fn fail_transport(&self, transport_id: TransportId) {
        self.emit(EngineEvent::IceStateChanged {
            transport_id,
            state: LinkState::Failed,
        });
    }

    /// Report both links of a transport as connected
    pub fn connect_links(&self, transport_id: TransportId) {
        self.emit(EngineEvent::IceStateChanged {
            transport_id,
            state: LinkState::Connected,
        });
        self.emit(EngineEvent::DtlsStateChanged {
            transport_id,
            state: LinkState::Connecting,
        });
        self.emit(EngineEvent::DtlsStateChanged {
            transport_id,
            state: LinkState::Connected,
        });
    }

    pub fn report_producer_score(&self, producer_id: ProducerId, score: u8) {
        self.emit(EngineEvent::ProducerScore { producer_id, score });
    }

    pub fn report_consumer_score(&self, consumer_id: ConsumerId, score: ConsumerScore) {
        self.emit(EngineEvent::ConsumerScore { consumer_id, score });
    }

    pub fn report_layers(&self, consumer_id: ConsumerId, layers: Option<ConsumerLayers>) {
        self.emit(EngineEvent::ConsumerLayersChanged {
            consumer_id,
            layers,
        });
    }

    /// Deliver a message from a data producer to each of its data consumers
    ///
    /// Returns the number of data consumers reached.
    pub fn send_data(&self, data_producer_id: DataProducerId, payload: Bytes) -> usize {
        let targets: Vec<DataConsumerId> = self
            .state()
            .data_consumers
            .iter()
            .filter(|(_, source)| **source == data_producer_id)
            .map(|(id, _)| *id)
            .collect();

        for data_consumer_id in &targets {
            self.emit(EngineEvent::DataMessage {
                data_consumer_id: *data_consumer_id,
                payload: payload.clone(),
            });
        }

        targets.len()
    }

    /// Simulate the engine process dying
    pub fn kill(&self, reason: &str) {
        self.alive.store(false, Ordering::SeqCst);
        self.emit(EngineEvent::Died {
            reason: reason.to_string(),
        });
    }

    /// While stalled, every async operation hangs forever
    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Resources released so far, in release order
    pub fn closed_resources(&self) -> Vec<EngineResource> {
        self.state().closed.clone()
    }

    /// Number of engine-side objects still alive
    pub fn live_resources(&self) -> usize {
        let state = self.state();
        state.transports.len()
            + state.producers.len()
            + state.consumers.len()
            + state.data_producers.len()
            + state.data_consumers.len()
    }

    /// Whether a consumer is currently paused engine-side
    pub fn is_consumer_paused(&self, id: ConsumerId) -> Option<bool> {
        self.state().consumers.get(&id).map(|(_, paused)| *paused)
    }

    async fn gate(&self) -> Result<(), EngineError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn allocate_port(&self, state: &mut LoopbackState) -> u16 {
        let port = state.next_port;
        state.next_port = if port >= self.config.max_port {
            self.config.min_port
        } else {
            port + 1
        };
        port
    }
}

fn random_token(len: usize) -> String {
    let mut token = Uuid::new_v4().simple().to_string();
    token.truncate(len);
    token
}

fn random_fingerprint() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn unknown(kind: &str, id: impl std::fmt::Display) -> EngineError {
    EngineError::Unknown(format!("{} {}", kind, id))
}

#[async_trait]
impl MediaEngine for LoopbackEngine {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    async fn create_transport(
        &self,
        id: TransportId,
        direction: Direction,
        options: &TransportOptions,
    ) -> Result<TransportParameters, EngineError> {
        self.gate().await?;

        if !options.enable_udp && !options.enable_tcp {
            return Err(EngineError::Rejected(
                "at least one of UDP or TCP must be enabled".into(),
            ));
        }

        let mut state = self.state();
        let port = self.allocate_port(&mut state);

        let mut ice_candidates = Vec::new();
        if options.enable_udp {
            ice_candidates.push(IceCandidate {
                foundation: "udpcandidate".into(),
                priority: if options.prefer_udp { 1076302079 } else { 1076276479 },
                ip: self.config.announced_ip.clone(),
                protocol: TransportProtocol::Udp,
                port,
                candidate_type: "host".into(),
                tcp_type: None,
            });
        }
        if options.enable_tcp {
            ice_candidates.push(IceCandidate {
                foundation: "tcpcandidate".into(),
                priority: if options.prefer_udp { 1076276479 } else { 1076302079 },
                ip: self.config.announced_ip.clone(),
                protocol: TransportProtocol::Tcp,
                port,
                candidate_type: "host".into(),
                tcp_type: Some("passive".into()),
            });
        }

        let sctp_parameters = options.enable_sctp.then(|| SctpParameters {
            port: SCTP_PORT,
            os: options.num_sctp_streams.os,
            mis: options.num_sctp_streams.mis,
            max_message_size: options.max_sctp_message_size,
        });

        state.transports.insert(
            id,
            LoopTransport {
                direction,
                sctp: options.enable_sctp,
                next_stream_id: 0,
            },
        );

        tracing::debug!(transport_id = %id, direction = %direction, port = port, "Loopback transport created");

        Ok(TransportParameters {
            id,
            ice_parameters: IceParameters {
                username_fragment: random_token(16),
                password: random_token(32),
                ice_lite: true,
            },
            ice_candidates,
            dtls_parameters: DtlsParameters {
                role: Some(DtlsRole::Auto),
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".into(),
                    value: random_fingerprint(),
                }],
            },
            sctp_parameters,
        })
    }

    async fn connect_transport(
        &self,
        id: TransportId,
        dtls: &DtlsParameters,
    ) -> Result<(), EngineError> {
        self.gate().await?;

        if dtls.fingerprints.is_empty() {
            return Err(EngineError::Rejected("no DTLS fingerprint".into()));
        }

        let sctp = {
            let state = self.state();
            let transport = state.transports.get(&id).ok_or_else(|| unknown("transport", id))?;
            transport.sctp
        };

        if self.config.auto_connect {
            self.connect_links(id);
            if sctp {
                self.emit(EngineEvent::SctpStateChanged {
                    transport_id: id,
                    state: LinkState::Connected,
                });
            }
        }

        Ok(())
    }

    async fn produce(
        &self,
        transport_id: TransportId,
        producer_id: ProducerId,
        kind: MediaKind,
        _rtp_parameters: &RtpParameters,
    ) -> Result<(), EngineError> {
        self.gate().await?;

        let mut state = self.state();
        match state.transports.get(&transport_id) {
            Some(t) if t.direction == Direction::Send => {}
            Some(_) => return Err(EngineError::Rejected("not a send transport".into())),
            None => return Err(unknown("transport", transport_id)),
        }
        state.producers.insert(producer_id, (transport_id, false));

        tracing::debug!(producer_id = %producer_id, kind = %kind, "Loopback producer created");
        Ok(())
    }

    async fn pause_producer(&self, id: ProducerId) -> Result<(), EngineError> {
        self.gate().await?;
        let mut state = self.state();
        let producer = state.producers.get_mut(&id).ok_or_else(|| unknown("producer", id))?;
        producer.1 = true;
        Ok(())
    }

    async fn resume_producer(&self, id: ProducerId) -> Result<(), EngineError> {
        self.gate().await?;
        let mut state = self.state();
        let producer = state.producers.get_mut(&id).ok_or_else(|| unknown("producer", id))?;
        producer.1 = false;
        Ok(())
    }

    async fn consume(
        &self,
        transport_id: TransportId,
        consumer_id: ConsumerId,
        producer_id: ProducerId,
        _rtp_parameters: &RtpParameters,
        paused: bool,
    ) -> Result<(), EngineError> {
        self.gate().await?;

        let mut state = self.state();
        if !state.transports.contains_key(&transport_id) {
            return Err(unknown("transport", transport_id));
        }
        if !state.producers.contains_key(&producer_id) {
            return Err(unknown("producer", producer_id));
        }
        state.consumers.insert(consumer_id, (producer_id, paused));
        Ok(())
    }

    async fn pause_consumer(&self, id: ConsumerId) -> Result<(), EngineError> {
        self.gate().await?;
        let mut state = self.state();
        let consumer = state.consumers.get_mut(&id).ok_or_else(|| unknown("consumer", id))?;
        consumer.1 = true;
        Ok(())
    }

    async fn resume_consumer(&self, id: ConsumerId) -> Result<(), EngineError> {
        self.gate().await?;
        let mut state = self.state();
        let consumer = state.consumers.get_mut(&id).ok_or_else(|| unknown("consumer", id))?;
        consumer.1 = false;
        Ok(())
    }

    async fn set_preferred_layers(
        &self,
        id: ConsumerId,
        layers: Option<ConsumerLayers>,
    ) -> Result<(), EngineError> {
        self.gate().await?;
        if !self.state().consumers.contains_key(&id) {
            return Err(unknown("consumer", id));
        }
        // the loopback engine switches instantly
        self.report_layers(id, layers);
        Ok(())
    }

    async fn set_priority(&self, id: ConsumerId, _priority: u32) -> Result<(), EngineError> {
        self.gate().await?;
        if !self.state().consumers.contains_key(&id) {
            return Err(unknown("consumer", id));
        }
        Ok(())
    }

    async fn produce_data(
        &self,
        transport_id: TransportId,
        data_producer_id: DataProducerId,
        _sctp_stream_parameters: &SctpStreamParameters,
    ) -> Result<(), EngineError> {
        self.gate().await?;

        let mut state = self.state();
        match state.transports.get(&transport_id) {
            Some(t) if t.sctp => {}
            Some(_) => return Err(EngineError::Rejected("SCTP not enabled".into())),
            None => return Err(unknown("transport", transport_id)),
        }
        state.data_producers.insert(data_producer_id, transport_id);
        Ok(())
    }

    async fn consume_data(
        &self,
        transport_id: TransportId,
        data_consumer_id: DataConsumerId,
        data_producer_id: DataProducerId,
    ) -> Result<SctpStreamParameters, EngineError> {
        self.gate().await?;

        let mut state = self.state();
        if !state.data_producers.contains_key(&data_producer_id) {
            return Err(unknown("data producer", data_producer_id));
        }
        let transport = state
            .transports
            .get_mut(&transport_id)
            .ok_or_else(|| unknown("transport", transport_id))?;
        if !transport.sctp {
            return Err(EngineError::Rejected("SCTP not enabled".into()));
        }

        let stream_id = transport.next_stream_id;
        transport.next_stream_id = transport.next_stream_id.wrapping_add(1);
        state.data_consumers.insert(data_consumer_id, data_producer_id);

        Ok(SctpStreamParameters {
            stream_id,
            ordered: Some(true),
            max_packet_life_time: None,
            max_retransmits: None,
        })
    }

    fn close(&self, resource: EngineResource) -> Result<(), EngineError> {
        let mut state = self.state();

        let existed = match resource {
            EngineResource::Transport(id) => state.transports.remove(&id).is_some(),
            EngineResource::Producer(id) => state.producers.remove(&id).is_some(),
            EngineResource::Consumer(id) => state.consumers.remove(&id).is_some(),
            EngineResource::DataProducer(id) => state.data_producers.remove(&id).is_some(),
            EngineResource::DataConsumer(id) => state.data_consumers.remove(&id).is_some(),
        };

        if !existed {
            return Err(EngineError::Unknown(format!("{:?}", resource)));
        }

        state.closed.push(resource);
        Ok(())
    }
}
