//! Client-side negotiation mirror
//!
//! Drives the negotiation from the client's side and keeps a local copy of
//! everything the session owns, keyed by the ids the server hands out:
//!
//! 1. load router capabilities and intersect them with the local device
//! 2. create and connect a send and a receive transport
//! 3. ask for the producers that already exist and consume each of them
//! 4. from then on, follow server notifications
//!
//! Produces are only recorded once the server returned the producer id.
//! Consumers are created paused and resumed once recorded locally; one that
//! cannot be resumed is closed again so a later consume starts over. A failed
//! request is reported as [`MirrorEvent::Error`] and leaves local state as it
//! was; the single automatic retry is a failed transport, which is replaced
//! by a fresh one of the same direction once.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;

use crate::engine::ConsumerScore;
use crate::error::ClientError;
use crate::media::{intersect_capabilities, ConsumerLayers, MediaKind, RtpCapabilities, RtpParameters};
use crate::protocol::message::{
    ConnectTransport, Consume, ConsumeData, ConsumerRef, CreateTransport, DataConsumerRef,
    DataProducerRef, Notification, Produce, ProduceData, ProducerRef, Request, ResponseBody,
    SetPreferredLayers, SetPriority, TransportRef, DEFAULT_DATA_LABEL,
};
use crate::registry::{ConsumerId, DataConsumerId, DataProducerId, ProducerId, TransportId};
use crate::transport::{Direction, SctpStreamParameters, TransportOptions, TransportParameters};

use super::device::LocalDevice;
use super::Signaler;

/// Progress and problems reported by the mirror
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    /// Both transports are up and existing producers were consumed
    Joined { producers: usize, data_producers: usize },
    TransportReady {
        direction: Direction,
        transport_id: TransportId,
    },
    /// A failed transport was replaced
    TransportRecovered {
        direction: Direction,
        transport_id: TransportId,
    },
    ProducerCreated {
        producer_id: ProducerId,
        kind: MediaKind,
    },
    ProducerClosed { producer_id: ProducerId },
    /// A consumer is resumed and ready to play
    ConsumerReady {
        consumer_id: ConsumerId,
        producer_id: ProducerId,
        kind: MediaKind,
    },
    ConsumerClosed {
        consumer_id: ConsumerId,
        producer_id: ProducerId,
    },
    DataProducerCreated { data_producer_id: DataProducerId },
    DataConsumerReady {
        data_consumer_id: DataConsumerId,
        data_producer_id: DataProducerId,
        label: String,
    },
    DataConsumerClosed { data_consumer_id: DataConsumerId },
    DataMessage {
        data_consumer_id: DataConsumerId,
        message: String,
    },
    /// A request failed; nothing local changed
    Error {
        operation: &'static str,
        message: String,
    },
    /// All local state was dropped
    Reset,
}

#[derive(Debug, Clone)]
pub struct LocalTransport {
    pub id: TransportId,
    pub direction: Direction,
    pub parameters: TransportParameters,
}

#[derive(Debug, Clone)]
pub struct LocalProducer {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub paused: bool,
    pub score: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct LocalConsumer {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
    pub producer_paused: bool,
    pub score: Option<ConsumerScore>,
    pub layers: Option<ConsumerLayers>,
}

#[derive(Debug, Clone)]
pub struct LocalDataProducer {
    pub id: DataProducerId,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct LocalDataConsumer {
    pub id: DataConsumerId,
    pub data_producer_id: DataProducerId,
    pub label: String,
}

fn unexpected(method: &'static str, body: ResponseBody) -> ClientError {
    ClientError::UnexpectedResponse {
        method,
        got: body.kind().to_string(),
    }
}

/// Client-side negotiation state machine
pub struct NegotiationMirror<S, D> {
    signaler: S,
    device: D,
    events: mpsc::UnboundedSender<MirrorEvent>,
    capabilities: Option<RtpCapabilities>,
    send_transport: Option<LocalTransport>,
    recv_transport: Option<LocalTransport>,
    producers: HashMap<ProducerId, LocalProducer>,
    consumers: HashMap<ConsumerId, LocalConsumer>,
    data_producers: HashMap<DataProducerId, LocalDataProducer>,
    data_consumers: HashMap<DataConsumerId, LocalDataConsumer>,
    next_stream_id: u16,
    recovered: HashSet<Direction>,
}

impl<S: Signaler, D: LocalDevice> NegotiationMirror<S, D> {
    /// Create a mirror over a signaler and a device
    ///
    /// Returns the mirror and a receiver for its events.
    pub fn new(signaler: S, device: D) -> (Self, mpsc::UnboundedReceiver<MirrorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let mirror = Self {
            signaler,
            device,
            events: tx,
            capabilities: None,
            send_transport: None,
            recv_transport: None,
            producers: HashMap::new(),
            consumers: HashMap::new(),
            data_producers: HashMap::new(),
            data_consumers: HashMap::new(),
            next_stream_id: 0,
            recovered: HashSet::new(),
        };

        (mirror, rx)
    }

    pub fn signaler(&self) -> &S {
        &self.signaler
    }

    /// Negotiated capabilities, once loaded
    pub fn capabilities(&self) -> Option<&RtpCapabilities> {
        self.capabilities.as_ref()
    }

    pub fn transport(&self, direction: Direction) -> Option<&LocalTransport> {
        match direction {
            Direction::Send => self.send_transport.as_ref(),
            Direction::Recv => self.recv_transport.as_ref(),
        }
    }

    pub fn producers(&self) -> &HashMap<ProducerId, LocalProducer> {
        &self.producers
    }

    pub fn consumers(&self) -> &HashMap<ConsumerId, LocalConsumer> {
        &self.consumers
    }

    pub fn data_producers(&self) -> &HashMap<DataProducerId, LocalDataProducer> {
        &self.data_producers
    }

    pub fn data_consumers(&self) -> &HashMap<DataConsumerId, LocalDataConsumer> {
        &self.data_consumers
    }

    /// Local consumer of a remote producer, if any
    pub fn consumer_for(&self, producer_id: ProducerId) -> Option<&LocalConsumer> {
        self.consumers.values().find(|c| c.producer_id == producer_id)
    }

    fn emit(&self, event: MirrorEvent) {
        let _ = self.events.send(event);
    }

    /// Report a failure as an event and hand it back
    fn surface<T>(&self, operation: &'static str, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(e) = &result {
            tracing::warn!(operation = operation, error = %e, "Negotiation step failed");
            self.emit(MirrorEvent::Error {
                operation,
                message: e.to_string(),
            });
        }
        result
    }

    fn ready_capabilities(&self) -> Result<&RtpCapabilities, ClientError> {
        self.capabilities
            .as_ref()
            .ok_or_else(|| ClientError::NotReady("capabilities not loaded".into()))
    }

    fn ready_transport(&self, direction: Direction) -> Result<&LocalTransport, ClientError> {
        self.transport(direction)
            .ok_or_else(|| ClientError::NotReady(format!("no {} transport", direction)))
    }

    // -----------------------------------------------------------------------
    // Join
    // -----------------------------------------------------------------------

    /// Run the whole join sequence
    pub async fn join(&mut self) -> Result<(), ClientError> {
        let result = self.try_join().await;
        self.surface("join", result)
    }

    async fn try_join(&mut self) -> Result<(), ClientError> {
        self.try_load_capabilities().await?;
        if self.send_transport.is_none() {
            self.try_create_transport(Direction::Send).await?;
        }
        if self.recv_transport.is_none() {
            self.try_create_transport(Direction::Recv).await?;
        }

        let producers = self.consume_existing().await?;
        let data_producers = self.consume_existing_data().await?;

        tracing::info!(producers = producers, data_producers = data_producers, "Joined");
        self.emit(MirrorEvent::Joined {
            producers,
            data_producers,
        });
        Ok(())
    }

    /// Fetch router capabilities and intersect them with the device
    pub async fn load_capabilities(&mut self) -> Result<RtpCapabilities, ClientError> {
        let result = self.try_load_capabilities().await;
        self.surface("load-capabilities", result)
    }

    async fn try_load_capabilities(&mut self) -> Result<RtpCapabilities, ClientError> {
        let router = match self.signaler.request(Request::GetCapabilities).await? {
            ResponseBody::Capabilities(caps) => caps,
            other => return Err(unexpected("get-capabilities", other)),
        };

        let caps = intersect_capabilities(&self.device.rtp_capabilities(), &router);
        if caps.codecs.is_empty() {
            return Err(ClientError::NotReady(
                "device shares no codec with the router".into(),
            ));
        }

        self.capabilities = Some(caps.clone());
        Ok(caps)
    }

    /// Create and connect a transport of the given direction
    pub async fn create_transport(&mut self, direction: Direction) -> Result<TransportId, ClientError> {
        let result = self.try_create_transport(direction).await;
        self.surface("create-transport", result)
    }

    async fn try_create_transport(&mut self, direction: Direction) -> Result<TransportId, ClientError> {
        self.ready_capabilities()?;

        let request = Request::CreateTransport(CreateTransport {
            direction,
            options: TransportOptions::default(),
        });
        let parameters = match self.signaler.request(request).await? {
            ResponseBody::TransportCreated(parameters) => parameters,
            other => return Err(unexpected("create-transport", other)),
        };
        let transport_id = parameters.id;

        let connect = Request::ConnectTransport(ConnectTransport {
            transport_id,
            dtls_parameters: self.device.dtls_parameters(),
        });
        if let Err(e) = self.signaler.request(connect).await {
            // no half-negotiated transport left behind
            let _ = self
                .signaler
                .request(Request::CloseTransport(TransportRef { transport_id }))
                .await;
            return Err(e);
        }

        let transport = LocalTransport {
            id: transport_id,
            direction,
            parameters,
        };
        match direction {
            Direction::Send => {
                self.send_transport = Some(transport);
                self.next_stream_id = 0;
            }
            Direction::Recv => self.recv_transport = Some(transport),
        }

        tracing::debug!(transport_id = %transport_id, direction = %direction, "Transport ready");
        self.emit(MirrorEvent::TransportReady {
            direction,
            transport_id,
        });
        Ok(transport_id)
    }

    /// Consume every producer that already exists; returns how many
    async fn consume_existing(&mut self) -> Result<usize, ClientError> {
        let producers = match self.signaler.request(Request::GetExistingProducers).await? {
            ResponseBody::Producers(producers) => producers,
            other => return Err(unexpected("get-existing-producers", other)),
        };

        let mut consumed = 0;
        for info in producers {
            if self.consume(info.producer_id).await.is_ok() {
                consumed += 1;
            }
        }
        Ok(consumed)
    }

    async fn consume_existing_data(&mut self) -> Result<usize, ClientError> {
        let producers = match self.signaler.request(Request::GetExistingDataProducers).await? {
            ResponseBody::DataProducers(producers) => producers,
            other => return Err(unexpected("get-existing-data-producers", other)),
        };

        let mut consumed = 0;
        for info in producers {
            if self.consume_data(info.data_producer_id).await.is_ok() {
                consumed += 1;
            }
        }
        Ok(consumed)
    }

    // -----------------------------------------------------------------------
    // Producing
    // -----------------------------------------------------------------------

    /// Produce a track of `kind` with `encodings` simulcast encodings
    pub async fn produce(
        &mut self,
        kind: MediaKind,
        encodings: usize,
        scalability_mode: Option<String>,
    ) -> Result<ProducerId, ClientError> {
        let result = self.try_produce(kind, encodings, scalability_mode).await;
        self.surface("produce", result)
    }

    async fn try_produce(
        &mut self,
        kind: MediaKind,
        encodings: usize,
        scalability_mode: Option<String>,
    ) -> Result<ProducerId, ClientError> {
        let transport_id = self.ready_transport(Direction::Send)?.id;
        let rtp_parameters = self
            .device
            .send_parameters(kind, self.ready_capabilities()?, encodings)
            .ok_or_else(|| ClientError::NotReady(format!("device cannot send {}", kind)))?;

        let request = Request::Produce(Produce {
            transport_id,
            kind,
            rtp_parameters,
            scalability_mode,
        });
        let producer_id = match self.signaler.request(request).await? {
            ResponseBody::ProducerCreated(ProducerRef { producer_id }) => producer_id,
            other => return Err(unexpected("produce", other)),
        };

        self.producers.insert(
            producer_id,
            LocalProducer {
                id: producer_id,
                kind,
                paused: false,
                score: None,
            },
        );

        tracing::debug!(producer_id = %producer_id, kind = %kind, "Producing");
        self.emit(MirrorEvent::ProducerCreated { producer_id, kind });
        Ok(producer_id)
    }

    pub async fn close_producer(&mut self, producer_id: ProducerId) -> Result<(), ClientError> {
        let result = self
            .signaler
            .request(Request::CloseProducer(ProducerRef { producer_id }))
            .await;
        self.surface("close-producer", result)?;

        if self.producers.remove(&producer_id).is_some() {
            self.emit(MirrorEvent::ProducerClosed { producer_id });
        }
        Ok(())
    }

    pub async fn pause_producer(&mut self, producer_id: ProducerId) -> Result<(), ClientError> {
        let result = self
            .signaler
            .request(Request::PauseProducer(ProducerRef { producer_id }))
            .await;
        self.surface("pause-producer", result)?;

        if let Some(producer) = self.producers.get_mut(&producer_id) {
            producer.paused = true;
        }
        Ok(())
    }

    pub async fn resume_producer(&mut self, producer_id: ProducerId) -> Result<(), ClientError> {
        let result = self
            .signaler
            .request(Request::ResumeProducer(ProducerRef { producer_id }))
            .await;
        self.surface("resume-producer", result)?;

        if let Some(producer) = self.producers.get_mut(&producer_id) {
            producer.paused = false;
        }
        Ok(())
    }

    /// Open a data channel on the send transport
    pub async fn produce_data(&mut self, label: Option<&str>) -> Result<DataProducerId, ClientError> {
        let result = self.try_produce_data(label).await;
        self.surface("produce-data", result)
    }

    async fn try_produce_data(&mut self, label: Option<&str>) -> Result<DataProducerId, ClientError> {
        let transport = self.ready_transport(Direction::Send)?;
        if transport.parameters.sctp_parameters.is_none() {
            return Err(ClientError::NotReady("send transport has no SCTP".into()));
        }
        let transport_id = transport.id;
        let label = label.unwrap_or(DEFAULT_DATA_LABEL).to_string();

        let request = Request::ProduceData(ProduceData {
            transport_id,
            sctp_stream_parameters: SctpStreamParameters {
                stream_id: self.next_stream_id,
                ordered: Some(true),
                ..Default::default()
            },
            label: label.clone(),
            protocol: String::new(),
        });
        let data_producer_id = match self.signaler.request(request).await? {
            ResponseBody::DataProducerCreated(DataProducerRef { data_producer_id }) => data_producer_id,
            other => return Err(unexpected("produce-data", other)),
        };

        self.next_stream_id = self.next_stream_id.wrapping_add(1);
        self.data_producers.insert(
            data_producer_id,
            LocalDataProducer {
                id: data_producer_id,
                label,
            },
        );
        self.emit(MirrorEvent::DataProducerCreated { data_producer_id });
        Ok(data_producer_id)
    }

    pub async fn close_data_producer(&mut self, data_producer_id: DataProducerId) -> Result<(), ClientError> {
        let result = self
            .signaler
            .request(Request::CloseDataProducer(DataProducerRef { data_producer_id }))
            .await;
        self.surface("close-data-producer", result)?;

        self.data_producers.remove(&data_producer_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Consuming
    // -----------------------------------------------------------------------

    /// Consume a remote producer and resume the consumer
    ///
    /// Consuming the same producer twice returns the existing consumer.
    pub async fn consume(&mut self, producer_id: ProducerId) -> Result<ConsumerId, ClientError> {
        let result = self.try_consume(producer_id).await;
        self.surface("consume", result)
    }

    async fn try_consume(&mut self, producer_id: ProducerId) -> Result<ConsumerId, ClientError> {
        if let Some(existing) = self.consumer_for(producer_id) {
            return Ok(existing.id);
        }

        let transport_id = self.ready_transport(Direction::Recv)?.id;
        let request = Request::Consume(Consume {
            transport_id,
            producer_id,
            rtp_capabilities: self.ready_capabilities()?.clone(),
        });
        let info = match self.signaler.request(request).await? {
            ResponseBody::ConsumerCreated(info) => info,
            other => return Err(unexpected("consume", other)),
        };
        let consumer_id = info.consumer_id;

        // the consumer is recorded before media is allowed to flow
        self.consumers.insert(
            consumer_id,
            LocalConsumer {
                id: consumer_id,
                producer_id,
                kind: info.kind,
                rtp_parameters: info.rtp_parameters,
                paused: info.paused,
                producer_paused: info.producer_paused,
                score: None,
                layers: None,
            },
        );

        let resumed = self
            .signaler
            .request(Request::ResumeConsumer(ConsumerRef { consumer_id }))
            .await;
        if let Err(e) = resumed {
            // a paused leftover would be returned as-is by the next consume
            self.consumers.remove(&consumer_id);
            if let Err(close_err) = self
                .signaler
                .request(Request::CloseConsumer(ConsumerRef { consumer_id }))
                .await
            {
                tracing::debug!(consumer_id = %consumer_id, error = %close_err, "Closing unresumed consumer failed");
            }
            return Err(e);
        }
        if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
            consumer.paused = false;
        }

        tracing::debug!(consumer_id = %consumer_id, producer_id = %producer_id, "Consuming");
        self.emit(MirrorEvent::ConsumerReady {
            consumer_id,
            producer_id,
            kind: info.kind,
        });
        Ok(consumer_id)
    }

    pub async fn pause_consumer(&mut self, consumer_id: ConsumerId) -> Result<(), ClientError> {
        let result = self
            .signaler
            .request(Request::PauseConsumer(ConsumerRef { consumer_id }))
            .await;
        self.surface("pause-consumer", result)?;

        if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
            consumer.paused = true;
        }
        Ok(())
    }

    pub async fn resume_consumer(&mut self, consumer_id: ConsumerId) -> Result<(), ClientError> {
        let result = self
            .signaler
            .request(Request::ResumeConsumer(ConsumerRef { consumer_id }))
            .await;
        self.surface("resume-consumer", result)?;

        if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
            consumer.paused = false;
        }
        Ok(())
    }

    pub async fn close_consumer(&mut self, consumer_id: ConsumerId) -> Result<(), ClientError> {
        let result = self
            .signaler
            .request(Request::CloseConsumer(ConsumerRef { consumer_id }))
            .await;
        self.surface("close-consumer", result)?;

        if let Some(consumer) = self.consumers.remove(&consumer_id) {
            self.emit(MirrorEvent::ConsumerClosed {
                consumer_id,
                producer_id: consumer.producer_id,
            });
        }
        Ok(())
    }

    /// Pin a consumer to a layer pair; both `None` restores automatic selection
    pub async fn set_preferred_layers(
        &mut self,
        consumer_id: ConsumerId,
        spatial_layer: Option<u8>,
        temporal_layer: Option<u8>,
    ) -> Result<(), ClientError> {
        let result = self
            .signaler
            .request(Request::SetPreferredLayers(SetPreferredLayers {
                consumer_id,
                spatial_layer,
                temporal_layer,
            }))
            .await;
        self.surface("set-preferred-layers", result).map(|_| ())
    }

    pub async fn set_priority(&mut self, consumer_id: ConsumerId, priority: u32) -> Result<(), ClientError> {
        let result = self
            .signaler
            .request(Request::SetPriority(SetPriority {
                consumer_id,
                priority,
            }))
            .await;
        self.surface("set-priority", result).map(|_| ())
    }

    /// Subscribe to a remote data producer
    pub async fn consume_data(&mut self, data_producer_id: DataProducerId) -> Result<DataConsumerId, ClientError> {
        let result = self.try_consume_data(data_producer_id).await;
        self.surface("consume-data", result)
    }

    async fn try_consume_data(&mut self, data_producer_id: DataProducerId) -> Result<DataConsumerId, ClientError> {
        if let Some(existing) = self
            .data_consumers
            .values()
            .find(|c| c.data_producer_id == data_producer_id)
        {
            return Ok(existing.id);
        }

        let transport_id = self.ready_transport(Direction::Recv)?.id;
        let request = Request::ConsumeData(ConsumeData {
            transport_id,
            data_producer_id,
        });
        let info = match self.signaler.request(request).await? {
            ResponseBody::DataConsumerCreated(info) => info,
            other => return Err(unexpected("consume-data", other)),
        };

        let data_consumer_id = info.data_consumer_id;
        self.data_consumers.insert(
            data_consumer_id,
            LocalDataConsumer {
                id: data_consumer_id,
                data_producer_id,
                label: info.label.clone(),
            },
        );
        self.emit(MirrorEvent::DataConsumerReady {
            data_consumer_id,
            data_producer_id,
            label: info.label,
        });
        Ok(data_consumer_id)
    }

    pub async fn close_data_consumer(&mut self, data_consumer_id: DataConsumerId) -> Result<(), ClientError> {
        let result = self
            .signaler
            .request(Request::CloseDataConsumer(DataConsumerRef { data_consumer_id }))
            .await;
        self.surface("close-data-consumer", result)?;

        if self.data_consumers.remove(&data_consumer_id).is_some() {
            self.emit(MirrorEvent::DataConsumerClosed { data_consumer_id });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Apply one server notification to local state
    pub async fn handle_notification(&mut self, notification: Notification) {
        match notification {
            Notification::NewProducer(info) => {
                // before the receive transport exists, the join query picks it up
                if self.recv_transport.is_some() {
                    let _ = self.consume(info.producer_id).await;
                }
            }
            Notification::ProducerClosed(ProducerRef { producer_id }) => {
                if self.producers.remove(&producer_id).is_some() {
                    self.emit(MirrorEvent::ProducerClosed { producer_id });
                }
            }
            Notification::ProducerScore(score) => {
                if let Some(producer) = self.producers.get_mut(&score.producer_id) {
                    producer.score = Some(score.score);
                }
            }
            Notification::ConsumerClosed(closed) => {
                if self.consumers.remove(&closed.consumer_id).is_some() {
                    self.emit(MirrorEvent::ConsumerClosed {
                        consumer_id: closed.consumer_id,
                        producer_id: closed.producer_id,
                    });
                }
            }
            Notification::ConsumerPaused(ConsumerRef { consumer_id }) => {
                if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
                    consumer.producer_paused = true;
                }
            }
            Notification::ConsumerResumed(ConsumerRef { consumer_id }) => {
                if let Some(consumer) = self.consumers.get_mut(&consumer_id) {
                    consumer.producer_paused = false;
                }
            }
            Notification::ConsumerScore(changed) => {
                if let Some(consumer) = self.consumers.get_mut(&changed.consumer_id) {
                    consumer.score = Some(changed.score);
                }
            }
            Notification::ConsumerLayersChanged(changed) => {
                if let Some(consumer) = self.consumers.get_mut(&changed.consumer_id) {
                    consumer.layers = changed.layers;
                }
            }
            Notification::NewDataProducer(info) => {
                let sctp = self
                    .recv_transport
                    .as_ref()
                    .map_or(false, |t| t.parameters.sctp_parameters.is_some());
                if sctp {
                    let _ = self.consume_data(info.data_producer_id).await;
                }
            }
            Notification::DataProducerClosed(DataProducerRef { data_producer_id }) => {
                self.data_producers.remove(&data_producer_id);
            }
            Notification::DataConsumerClosed(closed) => {
                if self.data_consumers.remove(&closed.data_consumer_id).is_some() {
                    self.emit(MirrorEvent::DataConsumerClosed {
                        data_consumer_id: closed.data_consumer_id,
                    });
                }
            }
            Notification::DataChannelMessage(message) => {
                self.emit(MirrorEvent::DataMessage {
                    data_consumer_id: message.data_consumer_id,
                    message: message.message,
                });
            }
            Notification::TransportFailed(failed) => {
                self.recover_transport(failed.direction, failed.transport_id)
                    .await;
            }
        }
    }

    /// Replace a failed transport with a fresh one, once per direction
    async fn recover_transport(&mut self, direction: Direction, failed: TransportId) {
        if self.transport(direction).map(|t| t.id) != Some(failed) {
            tracing::debug!(transport_id = %failed, "Failure of a transport no longer in use");
            return;
        }

        if !self.recovered.insert(direction) {
            self.emit(MirrorEvent::Error {
                operation: "recover-transport",
                message: format!("{} transport failed again", direction),
            });
            return;
        }

        tracing::warn!(transport_id = %failed, direction = %direction, "Transport failed, renegotiating");

        // the server cascades hosted resources with the transport
        let _ = self
            .signaler
            .request(Request::CloseTransport(TransportRef { transport_id: failed }))
            .await;
        self.drop_hosted(direction);

        let result = self.try_create_transport(direction).await;
        let Ok(transport_id) = self.surface("recover-transport", result) else {
            return;
        };

        self.emit(MirrorEvent::TransportRecovered {
            direction,
            transport_id,
        });

        if direction == Direction::Recv {
            let result = self.consume_existing().await;
            let _ = self.surface("recover-transport", result);
            let result = self.consume_existing_data().await;
            let _ = self.surface("recover-transport", result);
        }
    }

    /// Forget the transport of `direction` and everything it hosted
    fn drop_hosted(&mut self, direction: Direction) {
        match direction {
            Direction::Send => {
                self.send_transport = None;
                for (producer_id, _) in self.producers.drain() {
                    let _ = self.events.send(MirrorEvent::ProducerClosed { producer_id });
                }
                self.data_producers.clear();
            }
            Direction::Recv => {
                self.recv_transport = None;
                for (consumer_id, consumer) in self.consumers.drain() {
                    let _ = self.events.send(MirrorEvent::ConsumerClosed {
                        consumer_id,
                        producer_id: consumer.producer_id,
                    });
                }
                for (data_consumer_id, _) in self.data_consumers.drain() {
                    let _ = self.events.send(MirrorEvent::DataConsumerClosed { data_consumer_id });
                }
            }
        }
    }

    /// Drop all local state (the signaling channel is gone)
    pub fn reset(&mut self) {
        self.capabilities = None;
        self.send_transport = None;
        self.recv_transport = None;
        self.producers.clear();
        self.consumers.clear();
        self.data_producers.clear();
        self.data_consumers.clear();
        self.next_stream_id = 0;
        self.recovered.clear();

        tracing::info!("Negotiation state reset");
        self.emit(MirrorEvent::Reset);
    }

    /// Start over on a new signaling channel
    pub async fn reconnect(&mut self, signaler: S) -> Result<(), ClientError> {
        self.signaler = signaler;
        self.reset();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::client::{LocalSignaler, Signaler, StaticDevice};
    use crate::engine::LoopbackEngine;
    use crate::registry::{RegistryConfig, ResourceRegistry, SessionId};

    type Mirror = NegotiationMirror<LocalSignaler, StaticDevice>;

    struct Peer {
        mirror: Mirror,
        notifications: mpsc::UnboundedReceiver<Notification>,
        events: mpsc::UnboundedReceiver<MirrorEvent>,
    }

    impl Peer {
        /// Open a session without negotiating anything yet
        async fn connect(registry: &Arc<ResourceRegistry>, id: u64) -> Self {
            let (signaler, notifications) = LocalSignaler::connect(Arc::clone(registry), SessionId(id))
                .await
                .unwrap();
            let (mirror, events) = NegotiationMirror::new(signaler, StaticDevice::new());
            Self {
                mirror,
                notifications,
                events,
            }
        }

        async fn join(registry: &Arc<ResourceRegistry>, id: u64) -> Self {
            let mut peer = Self::connect(registry, id).await;
            peer.mirror.join().await.unwrap();
            peer
        }

        /// Feed every queued notification to the mirror
        async fn sync(&mut self) {
            while let Ok(notification) = self.notifications.try_recv() {
                self.mirror.handle_notification(notification).await;
            }
        }

        /// Wait for the next notification and feed it to the mirror
        async fn sync_one(&mut self) {
            let notification = tokio::time::timeout(Duration::from_secs(1), self.notifications.recv())
                .await
                .unwrap()
                .unwrap();
            self.mirror.handle_notification(notification).await;
        }

        fn drain_events(&mut self) -> Vec<MirrorEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    /// Signaler whose first resume request times out
    struct LostResume {
        inner: LocalSignaler,
        lost: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Signaler for LostResume {
        async fn request(&self, request: Request) -> Result<ResponseBody, ClientError> {
            if matches!(request, Request::ResumeConsumer(_)) && !self.lost.swap(true, Ordering::SeqCst) {
                return Err(ClientError::Timeout {
                    method: request.method(),
                    timeout_ms: 0,
                });
            }
            self.inner.request(request).await
        }
    }

    fn setup() -> (Arc<ResourceRegistry>, Arc<LoopbackEngine>) {
        let (engine, events) = LoopbackEngine::new();
        let engine = Arc::new(engine);
        let registry = Arc::new(ResourceRegistry::with_config(
            engine.clone(),
            RegistryConfig::default().engine_timeout(Duration::from_millis(500)),
        ));
        registry.spawn_event_pump(events);
        (registry, engine)
    }

    #[tokio::test]
    async fn test_join_creates_transports() {
        let (registry, _engine) = setup();
        let mut peer = Peer::join(&registry, 1).await;

        assert!(peer.mirror.capabilities().is_some());
        assert!(peer.mirror.transport(Direction::Send).is_some());
        assert!(peer.mirror.transport(Direction::Recv).is_some());

        let events = peer.drain_events();
        assert_eq!(
            events.last(),
            Some(&MirrorEvent::Joined {
                producers: 0,
                data_producers: 0
            })
        );
    }

    #[tokio::test]
    async fn test_late_joiner_consumes_existing() {
        let (registry, _engine) = setup();
        let mut alice = Peer::join(&registry, 1).await;
        let audio = alice.mirror.produce(MediaKind::Audio, 1, None).await.unwrap();
        let video = alice.mirror.produce(MediaKind::Video, 3, None).await.unwrap();

        let mut bob = Peer::join(&registry, 2).await;
        assert_eq!(bob.mirror.consumers().len(), 2);
        assert!(bob.mirror.consumer_for(audio).is_some());
        let consumer = bob.mirror.consumer_for(video).unwrap();
        assert!(!consumer.paused);

        bob.sync().await;
        assert_eq!(bob.mirror.consumers().len(), 2);
        assert_eq!(registry.snapshot().await.consumers, 2);
    }

    #[tokio::test]
    async fn test_follows_producer_lifecycle() {
        let (registry, _engine) = setup();
        let mut alice = Peer::join(&registry, 1).await;
        let mut bob = Peer::join(&registry, 2).await;

        let producer = alice.mirror.produce(MediaKind::Video, 1, None).await.unwrap();
        bob.sync_one().await;
        let consumer_id = bob.mirror.consumer_for(producer).unwrap().id;

        alice.mirror.pause_producer(producer).await.unwrap();
        bob.sync_one().await;
        assert!(bob.mirror.consumers()[&consumer_id].producer_paused);

        alice.mirror.close_producer(producer).await.unwrap();
        bob.sync_one().await;
        assert!(bob.mirror.consumers().is_empty());
        assert!(bob.drain_events().contains(&MirrorEvent::ConsumerClosed {
            consumer_id,
            producer_id: producer
        }));
    }

    #[tokio::test]
    async fn test_error_leaves_state_untouched() {
        let (registry, _engine) = setup();
        let mut alice = Peer::join(&registry, 1).await;
        alice.drain_events();

        let err = alice
            .mirror
            .set_priority(ConsumerId::new(), 0)
            .await
            .unwrap_err();
        assert_eq!(err.server_code(), Some("invalid-parameters"));
        assert!(matches!(
            alice.drain_events().as_slice(),
            [MirrorEvent::Error { operation: "set-priority", .. }]
        ));
        assert!(alice.mirror.transport(Direction::Send).is_some());
    }

    #[tokio::test]
    async fn test_failed_transport_is_replaced_once() {
        let (registry, engine) = setup();
        let mut alice = Peer::join(&registry, 1).await;
        let mut bob = Peer::join(&registry, 2).await;
        let producer = alice.mirror.produce(MediaKind::Audio, 1, None).await.unwrap();
        bob.sync_one().await;

        let failed = bob.mirror.transport(Direction::Recv).unwrap().id;
        engine.fail_transport(failed);
        bob.sync_one().await;

        let replacement = bob.mirror.transport(Direction::Recv).unwrap().id;
        assert_ne!(replacement, failed);
        // producers were consumed again over the new transport
        assert!(bob.mirror.consumer_for(producer).is_some());
        assert!(bob.drain_events().contains(&MirrorEvent::TransportRecovered {
            direction: Direction::Recv,
            transport_id: replacement
        }));

        // a second failure is only reported
        engine.fail_transport(replacement);
        loop {
            bob.sync_one().await;
            let events = bob.drain_events();
            if events
                .iter()
                .any(|e| matches!(e, MirrorEvent::Error { operation: "recover-transport", .. }))
            {
                break;
            }
        }
        assert_eq!(bob.mirror.transport(Direction::Recv).unwrap().id, replacement);
    }

    #[tokio::test]
    async fn test_reset_and_reconnect() {
        let (registry, _engine) = setup();
        let mut alice = Peer::join(&registry, 1).await;
        alice.mirror.produce(MediaKind::Audio, 1, None).await.unwrap();

        alice.mirror.signaler().disconnect().await;
        alice.mirror.reset();
        assert!(alice.mirror.producers().is_empty());
        assert!(alice.mirror.transport(Direction::Send).is_none());
        assert_eq!(registry.snapshot().await.producers, 0);

        let (signaler, _notifications) = LocalSignaler::connect(Arc::clone(&registry), SessionId(11))
            .await
            .unwrap();
        alice.mirror.reconnect(signaler).await.unwrap();
        assert!(alice.mirror.transport(Direction::Recv).is_some());
        assert_eq!(registry.snapshot().await.sessions, 1);
    }

    #[tokio::test]
    async fn test_data_channel_messages() {
        let (registry, engine) = setup();
        let mut alice = Peer::join(&registry, 1).await;
        let mut bob = Peer::join(&registry, 2).await;

        let dp = alice.mirror.produce_data(Some("chat")).await.unwrap();
        bob.sync_one().await;
        let dc = bob
            .mirror
            .data_consumers()
            .values()
            .find(|c| c.data_producer_id == dp)
            .map(|c| c.id)
            .unwrap();

        engine.send_data(dp, bytes::Bytes::from_static(b"hello"));
        bob.sync_one().await;
        assert!(bob.drain_events().contains(&MirrorEvent::DataMessage {
            data_consumer_id: dc,
            message: "hello".into()
        }));
    }

    #[tokio::test]
    async fn test_producer_seen_by_query_and_notification_once() {
        let (registry, _engine) = setup();
        let mut alice = Peer::join(&registry, 1).await;
        // bob's session exists, so the producer is also announced to him
        let mut bob = Peer::connect(&registry, 2).await;
        let video = alice.mirror.produce(MediaKind::Video, 1, None).await.unwrap();

        bob.mirror.join().await.unwrap();
        let consumer_id = bob.mirror.consumer_for(video).unwrap().id;
        bob.sync().await;

        assert_eq!(bob.mirror.consumers().len(), 1);
        assert_eq!(bob.mirror.consumer_for(video).unwrap().id, consumer_id);
        assert_eq!(registry.snapshot().await.consumers, 1);
        let ready = bob
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, MirrorEvent::ConsumerReady { .. }))
            .count();
        assert_eq!(ready, 1);
    }

    #[tokio::test]
    async fn test_unresumed_consumer_is_closed() {
        let (registry, _engine) = setup();
        let mut alice = Peer::join(&registry, 1).await;

        let (inner, _notifications) = LocalSignaler::connect(Arc::clone(&registry), SessionId(2))
            .await
            .unwrap();
        let signaler = LostResume {
            inner,
            lost: AtomicBool::new(false),
        };
        let (mut bob, _events) = NegotiationMirror::new(signaler, StaticDevice::new());
        bob.join().await.unwrap();

        let audio = alice.mirror.produce(MediaKind::Audio, 1, None).await.unwrap();
        let err = bob.consume(audio).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { method: "resume-consumer", .. }));
        assert!(bob.consumer_for(audio).is_none());
        assert_eq!(registry.snapshot().await.consumers, 0);

        // retrying starts over and ends with a flowing consumer
        let consumer_id = bob.consume(audio).await.unwrap();
        let consumer = bob.consumer_for(audio).unwrap();
        assert_eq!(consumer.id, consumer_id);
        assert!(!consumer.paused);
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.consumers, 1);
        assert_eq!(snapshot.paused_consumers, 0);
    }
}
