//! Producer and consumer lifecycle
//!
//! A producer is one outbound media flow on a send transport; a consumer is
//! one inbound flow on a receive transport, sourced from exactly one producer.
//! Consumers are always created paused and only start flowing once the
//! consuming session resumes them.

use std::time::Instant;

use crate::engine::EngineResource;
use crate::media::capabilities::{validate_producer, ProducerParamsError};
use crate::media::simulcast::{apply_scalability_mode, apply_simulcast_ceilings, resolve_preferred_layers};
use crate::media::{consumer_rtp_parameters, can_consume, LayerBounds, MediaKind, RtpCapabilities, RtpParameters};
use crate::protocol::message::{ConsumerInfo, ConsumerRef, Notification};
use crate::transport::Direction;

use super::entry::{CloseCause, ConsumerEntry, ProducerEntry};
use super::error::RegistryError;
use super::ids::{ConsumerId, ProducerId, ResourceKind, SessionId, TransportId};
use super::store::{Pending, ResourceRegistry};

impl ResourceRegistry {
    /// Create a producer on a send transport and announce it to every other
    /// session
    ///
    /// Multi-encoding (simulcast) parameters get ascending bitrate ceilings;
    /// a scalability mode is applied to the first encoding.
    pub async fn create_producer(
        &self,
        session_id: SessionId,
        transport_id: TransportId,
        kind: MediaKind,
        mut rtp_parameters: RtpParameters,
        scalability_mode: Option<String>,
    ) -> Result<ProducerId, RegistryError> {
        validate_producer(kind, &rtp_parameters, &self.router_capabilities).map_err(|e| match e {
            ProducerParamsError::Unsupported(_) => {
                RegistryError::IncompatibleCapabilities(e.to_string())
            }
            _ => RegistryError::InvalidParameters(e.to_string()),
        })?;

        apply_simulcast_ceilings(kind, &mut rtp_parameters.encodings);
        if let Some(mode) = scalability_mode.as_deref() {
            apply_scalability_mode(&mut rtp_parameters.encodings, mode)
                .map_err(RegistryError::InvalidParameters)?;
        }

        let id = ProducerId::new();
        let key = Pending::Producer(session_id, id);
        {
            let mut tables = self.tables.write().await;
            tables.session(session_id)?;
            tables.usable_transport(session_id, transport_id, Direction::Send)?;
            tables.pending.insert(key);
        }

        let result = self
            .engine_call(
                "produce",
                self.engine.produce(transport_id, id, kind, &rtp_parameters),
            )
            .await;

        let mut tables = self.tables.write().await;
        let reserved = tables.pending.remove(&key);

        if let Err(e) = result {
            if matches!(e, RegistryError::Timeout { .. }) {
                self.discard_engine(EngineResource::Producer(id));
            }
            return Err(e);
        }

        if !reserved || tables.session(session_id).is_err() {
            self.discard_engine(EngineResource::Producer(id));
            return Err(RegistryError::not_found(ResourceKind::Session, session_id));
        }
        if tables.owned_transport(session_id, transport_id).is_err() {
            self.discard_engine(EngineResource::Producer(id));
            return Err(RegistryError::not_found(ResourceKind::Transport, transport_id));
        }

        let encodings = rtp_parameters.encodings.len();
        tables.producers.insert(
            id,
            ProducerEntry {
                id,
                session_id,
                transport_id,
                kind,
                rtp_parameters,
                paused: false,
                score: None,
                consumers: Default::default(),
                created_at: Instant::now(),
            },
        );
        if let Some(transport) = tables.transports.get_mut(&transport_id) {
            transport.producers.insert(id);
        }
        if let Ok(session) = tables.session_mut(session_id) {
            session.producers.insert(id);
        }

        let notified = self.broadcast_new_producer_locked(&tables, session_id, id);

        tracing::info!(
            session_id = %session_id,
            producer_id = %id,
            kind = %kind,
            encodings = encodings,
            scalability_mode = ?scalability_mode,
            notified = notified,
            "Producer created"
        );

        Ok(id)
    }

    /// Close a producer and every consumer fed by it
    ///
    /// Closing an unknown producer is a no-op; closing someone else's is not.
    pub async fn close_producer(
        &self,
        session_id: SessionId,
        producer_id: ProducerId,
    ) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;

        match tables.producers.get(&producer_id) {
            None => Ok(()),
            Some(p) if p.session_id != session_id => {
                Err(RegistryError::not_found(ResourceKind::Producer, producer_id))
            }
            Some(_) => {
                self.close_producer_locked(&mut tables, producer_id, CloseCause::Requested);
                Ok(())
            }
        }
    }

    /// Pause a producer; its consumers are told they stopped receiving
    pub async fn pause_producer(
        &self,
        session_id: SessionId,
        producer_id: ProducerId,
    ) -> Result<(), RegistryError> {
        self.set_producer_paused(session_id, producer_id, true).await
    }

    pub async fn resume_producer(
        &self,
        session_id: SessionId,
        producer_id: ProducerId,
    ) -> Result<(), RegistryError> {
        self.set_producer_paused(session_id, producer_id, false).await
    }

    async fn set_producer_paused(
        &self,
        session_id: SessionId,
        producer_id: ProducerId,
        paused: bool,
    ) -> Result<(), RegistryError> {
        {
            let tables = self.tables.read().await;
            let producer = tables.owned_producer(session_id, producer_id)?;
            if producer.paused == paused {
                return Ok(());
            }
        }

        if paused {
            self.engine_call("pause-producer", self.engine.pause_producer(producer_id))
                .await?;
        } else {
            self.engine_call("resume-producer", self.engine.resume_producer(producer_id))
                .await?;
        }

        let mut tables = self.tables.write().await;
        let consumers: Vec<ConsumerId> = match tables.producers.get_mut(&producer_id) {
            Some(producer) => {
                producer.paused = paused;
                producer.consumers.iter().copied().collect()
            }
            None => return Err(RegistryError::not_found(ResourceKind::Producer, producer_id)),
        };

        for consumer_id in &consumers {
            let owner = match tables.consumers.get_mut(consumer_id) {
                Some(consumer) => {
                    consumer.producer_paused = paused;
                    consumer.session_id
                }
                None => continue,
            };
            let notification = if paused {
                Notification::ConsumerPaused(ConsumerRef {
                    consumer_id: *consumer_id,
                })
            } else {
                Notification::ConsumerResumed(ConsumerRef {
                    consumer_id: *consumer_id,
                })
            };
            tables.notify(owner, notification);
        }

        tracing::info!(
            session_id = %session_id,
            producer_id = %producer_id,
            paused = paused,
            consumers = consumers.len(),
            "Producer pause state changed"
        );
        Ok(())
    }

    /// Create a paused consumer of `producer_id` on a receive transport
    ///
    /// At most one consumer per (session, producer): a second request, even
    /// one racing the first, fails with `AlreadyConsuming`.
    pub async fn create_consumer(
        &self,
        session_id: SessionId,
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumerInfo, RegistryError> {
        let id = ConsumerId::new();
        let key = Pending::Consume(session_id, producer_id);

        let (kind, rtp_parameters) = {
            let mut tables = self.tables.write().await;
            let session = tables.session(session_id)?;
            tables.usable_transport(session_id, transport_id, Direction::Recv)?;

            let producer = tables
                .producers
                .get(&producer_id)
                .ok_or_else(|| RegistryError::not_found(ResourceKind::Producer, producer_id))?;

            let already = session.consumers.iter().any(|c| {
                tables
                    .consumers
                    .get(c)
                    .map_or(false, |c| c.producer_id == producer_id)
            });
            if already || tables.pending.contains(&key) {
                return Err(RegistryError::AlreadyConsuming(producer_id.to_string()));
            }

            if !can_consume(&producer.rtp_parameters, &rtp_capabilities) {
                return Err(RegistryError::IncompatibleCapabilities(format!(
                    "cannot consume {} producer {}",
                    producer.kind, producer_id
                )));
            }

            let ssrc = id.as_uuid().as_u128() as u32;
            let rtp_parameters = consumer_rtp_parameters(
                producer.kind,
                &producer.rtp_parameters,
                &rtp_capabilities,
                ssrc,
            )
            .ok_or_else(|| {
                RegistryError::IncompatibleCapabilities(format!("no common codec for {}", producer_id))
            })?;
            let kind = producer.kind;

            if let Ok(session) = tables.session_mut(session_id) {
                session.rtp_capabilities = Some(rtp_capabilities);
            }
            tables.pending.insert(key);
            (kind, rtp_parameters)
        };

        let result = self
            .engine_call(
                "consume",
                self.engine
                    .consume(transport_id, id, producer_id, &rtp_parameters, true),
            )
            .await;

        let mut tables = self.tables.write().await;
        let reserved = tables.pending.remove(&key);

        if let Err(e) = result {
            if matches!(e, RegistryError::Timeout { .. }) {
                self.discard_engine(EngineResource::Consumer(id));
            }
            return Err(e);
        }

        if !reserved || tables.session(session_id).is_err() {
            self.discard_engine(EngineResource::Consumer(id));
            return Err(RegistryError::not_found(ResourceKind::Session, session_id));
        }
        if tables.owned_transport(session_id, transport_id).is_err() {
            self.discard_engine(EngineResource::Consumer(id));
            return Err(RegistryError::not_found(ResourceKind::Transport, transport_id));
        }
        let producer_paused = match tables.producers.get_mut(&producer_id) {
            Some(producer) => {
                producer.consumers.insert(id);
                producer.paused
            }
            None => {
                self.discard_engine(EngineResource::Consumer(id));
                return Err(RegistryError::not_found(ResourceKind::Producer, producer_id));
            }
        };

        let entry = ConsumerEntry {
            id,
            session_id,
            transport_id,
            producer_id,
            kind,
            rtp_parameters,
            paused: true,
            producer_paused,
            preferred_layers: None,
            current_layers: None,
            priority: self.config.default_consumer_priority,
            score: None,
            created_at: Instant::now(),
        };
        let info = entry.info();

        tables.consumers.insert(id, entry);
        if let Some(transport) = tables.transports.get_mut(&transport_id) {
            transport.consumers.insert(id);
        }
        if let Ok(session) = tables.session_mut(session_id) {
            session.consumers.insert(id);
        }

        tracing::info!(
            session_id = %session_id,
            consumer_id = %id,
            producer_id = %producer_id,
            kind = %kind,
            producer_paused = producer_paused,
            "Consumer created (paused)"
        );

        Ok(info)
    }

    /// Start media flow on a paused consumer
    pub async fn resume_consumer(
        &self,
        session_id: SessionId,
        consumer_id: ConsumerId,
    ) -> Result<(), RegistryError> {
        self.set_consumer_paused(session_id, consumer_id, false).await
    }

    pub async fn pause_consumer(
        &self,
        session_id: SessionId,
        consumer_id: ConsumerId,
    ) -> Result<(), RegistryError> {
        self.set_consumer_paused(session_id, consumer_id, true).await
    }

    async fn set_consumer_paused(
        &self,
        session_id: SessionId,
        consumer_id: ConsumerId,
        paused: bool,
    ) -> Result<(), RegistryError> {
        {
            let tables = self.tables.read().await;
            let consumer = tables.owned_consumer(session_id, consumer_id)?;
            if consumer.paused == paused {
                return Ok(());
            }
        }

        if paused {
            self.engine_call("pause-consumer", self.engine.pause_consumer(consumer_id))
                .await?;
        } else {
            self.engine_call("resume-consumer", self.engine.resume_consumer(consumer_id))
                .await?;
        }

        let mut tables = self.tables.write().await;
        let consumer = tables
            .consumers
            .get_mut(&consumer_id)
            .ok_or_else(|| RegistryError::not_found(ResourceKind::Consumer, consumer_id))?;
        consumer.paused = paused;

        tracing::debug!(
            session_id = %session_id,
            consumer_id = %consumer_id,
            paused = paused,
            "Consumer pause state changed"
        );
        Ok(())
    }

    /// Close a consumer at its owner's request
    pub async fn close_consumer(
        &self,
        session_id: SessionId,
        consumer_id: ConsumerId,
    ) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;

        match tables.consumers.get(&consumer_id) {
            None => Ok(()),
            Some(c) if c.session_id != session_id => {
                Err(RegistryError::not_found(ResourceKind::Consumer, consumer_id))
            }
            Some(_) => {
                self.close_consumer_locked(&mut tables, consumer_id, CloseCause::Requested);
                Ok(())
            }
        }
    }

    /// Ask for specific simulcast/SVC layers
    ///
    /// Both indices omitted means automatic selection. If only one is given
    /// the other defaults to the highest layer the producer sends.
    pub async fn set_preferred_layers(
        &self,
        session_id: SessionId,
        consumer_id: ConsumerId,
        spatial_layer: Option<u8>,
        temporal_layer: Option<u8>,
    ) -> Result<(), RegistryError> {
        let layers = {
            let tables = self.tables.read().await;
            let consumer = tables.owned_consumer(session_id, consumer_id)?;
            let producer = tables
                .producers
                .get(&consumer.producer_id)
                .ok_or_else(|| RegistryError::not_found(ResourceKind::Producer, consumer.producer_id))?;

            resolve_preferred_layers(
                LayerBounds::of(&producer.rtp_parameters),
                spatial_layer,
                temporal_layer,
            )
            .map_err(|e| RegistryError::InvalidLayer(e.to_string()))?
        };

        self.engine_call(
            "set-preferred-layers",
            self.engine.set_preferred_layers(consumer_id, layers),
        )
        .await?;

        let mut tables = self.tables.write().await;
        let consumer = tables
            .consumers
            .get_mut(&consumer_id)
            .ok_or_else(|| RegistryError::not_found(ResourceKind::Consumer, consumer_id))?;
        consumer.preferred_layers = layers;

        tracing::debug!(
            session_id = %session_id,
            consumer_id = %consumer_id,
            layers = ?layers,
            "Preferred layers set"
        );
        Ok(())
    }

    /// Set a consumer's bandwidth priority (1 = lowest)
    pub async fn set_priority(
        &self,
        session_id: SessionId,
        consumer_id: ConsumerId,
        priority: u32,
    ) -> Result<(), RegistryError> {
        if priority == 0 {
            return Err(RegistryError::InvalidParameters(
                "priority must be at least 1".into(),
            ));
        }

        {
            let tables = self.tables.read().await;
            tables.owned_consumer(session_id, consumer_id)?;
        }

        self.engine_call("set-priority", self.engine.set_priority(consumer_id, priority))
            .await?;

        let mut tables = self.tables.write().await;
        let consumer = tables
            .consumers
            .get_mut(&consumer_id)
            .ok_or_else(|| RegistryError::not_found(ResourceKind::Consumer, consumer_id))?;
        consumer.priority = priority;

        tracing::debug!(
            session_id = %session_id,
            consumer_id = %consumer_id,
            priority = priority,
            "Consumer priority set"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::media::rtp::{RtcpFeedback, RtpCodecParameters, RtpEncodingParameters};
    use crate::registry::store::tests::{dtls, registry, session};
    use crate::transport::{TransportOptions, TransportParameters};

    pub(crate) fn vp8(encodings: usize) -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "video/VP8".into(),
                payload_type: 96,
                clock_rate: 90_000,
                channels: None,
                parameters: Default::default(),
                rtcp_feedback: vec![RtcpFeedback::new("nack", "")],
            }],
            encodings: (0..encodings)
                .map(|i| RtpEncodingParameters {
                    rid: Some(format!("r{}", i)),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    pub(crate) fn opus() -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".into(),
                payload_type: 111,
                clock_rate: 48_000,
                channels: Some(2),
                parameters: Default::default(),
                rtcp_feedback: vec![],
            }],
            encodings: vec![RtpEncodingParameters::default()],
            ..Default::default()
        }
    }

    async fn transport(
        registry: &ResourceRegistry,
        session: SessionId,
        direction: Direction,
    ) -> TransportParameters {
        let params = registry
            .create_transport(session, direction, TransportOptions::default())
            .await
            .unwrap();
        registry
            .connect_transport(session, params.id, dtls())
            .await
            .unwrap();
        params
    }

    #[tokio::test]
    async fn test_produce_and_consume() {
        let (registry, _engine) = registry();
        let (alice, _rx_a) = session(&registry, 1).await;
        let (bob, mut rx_b) = session(&registry, 2).await;

        let send = transport(&registry, alice, Direction::Send).await;
        let recv = transport(&registry, bob, Direction::Recv).await;

        let producer = registry
            .create_producer(alice, send.id, MediaKind::Video, vp8(1), None)
            .await
            .unwrap();

        match rx_b.try_recv().unwrap() {
            Notification::NewProducer(info) => {
                assert_eq!(info.producer_id, producer);
                assert_eq!(info.kind, MediaKind::Video);
            }
            other => panic!("unexpected notification {:?}", other),
        }

        let caps = registry.router_capabilities().clone();
        let consumer = registry
            .create_consumer(bob, recv.id, producer, caps.clone())
            .await
            .unwrap();
        assert!(consumer.paused);
        assert_eq!(consumer.producer_id, producer);

        // at most one consumer per producer and session
        assert!(matches!(
            registry.create_consumer(bob, recv.id, producer, caps).await,
            Err(RegistryError::AlreadyConsuming(_))
        ));

        registry.resume_consumer(bob, consumer.consumer_id).await.unwrap();
        // resuming twice is harmless
        registry.resume_consumer(bob, consumer.consumer_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_consume_of_one_producer() {
        let (registry, _engine) = registry();
        let (alice, _rx_a) = session(&registry, 1).await;
        let (bob, _rx_b) = session(&registry, 2).await;
        let send = transport(&registry, alice, Direction::Send).await;
        let recv = transport(&registry, bob, Direction::Recv).await;
        let producer = registry
            .create_producer(alice, send.id, MediaKind::Audio, opus(), None)
            .await
            .unwrap();

        let caps = registry.router_capabilities().clone();
        let (first, second) = tokio::join!(
            registry.create_consumer(bob, recv.id, producer, caps.clone()),
            registry.create_consumer(bob, recv.id, producer, caps)
        );

        let created = [&first, &second].iter().filter(|r| r.is_ok()).count();
        let refused = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Err(RegistryError::AlreadyConsuming(_))))
            .count();
        assert_eq!((created, refused), (1, 1));
        assert_eq!(registry.snapshot().await.consumers, 1);
    }

    #[tokio::test]
    async fn test_concurrent_close_consumer() {
        let (registry, engine) = registry();
        let (alice, _rx_a) = session(&registry, 1).await;
        let (bob, _rx_b) = session(&registry, 2).await;
        let send = transport(&registry, alice, Direction::Send).await;
        let recv = transport(&registry, bob, Direction::Recv).await;
        let producer = registry
            .create_producer(alice, send.id, MediaKind::Audio, opus(), None)
            .await
            .unwrap();
        let consumer = registry
            .create_consumer(bob, recv.id, producer, registry.router_capabilities().clone())
            .await
            .unwrap()
            .consumer_id;

        let (first, second) = tokio::join!(
            registry.close_consumer(bob, consumer),
            registry.close_consumer(bob, consumer)
        );
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(registry.snapshot().await.consumers, 0);

        let closed = engine
            .closed_resources()
            .into_iter()
            .filter(|r| *r == EngineResource::Consumer(consumer))
            .count();
        assert_eq!(closed, 1);
    }

    #[tokio::test]
    async fn test_produce_on_recv_transport() {
        let (registry, _engine) = registry();
        let (alice, _rx) = session(&registry, 1).await;
        let recv = transport(&registry, alice, Direction::Recv).await;

        assert!(matches!(
            registry
                .create_producer(alice, recv.id, MediaKind::Video, vp8(1), None)
                .await,
            Err(RegistryError::InvalidDirection { .. })
        ));

        let send = transport(&registry, alice, Direction::Send).await;
        assert!(matches!(
            registry
                .create_producer(alice, send.id, MediaKind::Audio, vp8(1), None)
                .await,
            Err(RegistryError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_simulcast_ceilings_applied() {
        let (registry, _engine) = registry();
        let (alice, _rx_a) = session(&registry, 1).await;
        let (bob, _rx_b) = session(&registry, 2).await;
        let send = transport(&registry, alice, Direction::Send).await;
        let recv = transport(&registry, bob, Direction::Recv).await;

        let producer = registry
            .create_producer(alice, send.id, MediaKind::Video, vp8(3), None)
            .await
            .unwrap();

        {
            let tables = registry.tables.read().await;
            let encodings = &tables.producers[&producer].rtp_parameters.encodings;
            assert_eq!(encodings[0].max_bitrate, Some(200_000));
            assert_eq!(encodings[1].max_bitrate, Some(500_000));
            assert_eq!(encodings[2].max_bitrate, Some(1_500_000));
        }

        let caps = registry.router_capabilities().clone();
        let consumer = registry
            .create_consumer(bob, recv.id, producer, caps)
            .await
            .unwrap();
        assert_eq!(
            consumer.rtp_parameters.encodings[0].scalability_mode.as_deref(),
            Some("L3T1")
        );

        registry
            .set_preferred_layers(bob, consumer.consumer_id, Some(1), None)
            .await
            .unwrap();
        assert!(matches!(
            registry
                .set_preferred_layers(bob, consumer.consumer_id, Some(3), Some(0))
                .await,
            Err(RegistryError::InvalidLayer(_))
        ));

        assert!(matches!(
            registry.set_priority(bob, consumer.consumer_id, 0).await,
            Err(RegistryError::InvalidParameters(_))
        ));
        registry.set_priority(bob, consumer.consumer_id, 5).await.unwrap();
    }

    #[tokio::test]
    async fn test_svc_mode_applied() {
        let (registry, _engine) = registry();
        let (alice, _rx) = session(&registry, 1).await;
        let send = transport(&registry, alice, Direction::Send).await;

        let producer = registry
            .create_producer(alice, send.id, MediaKind::Video, vp8(1), Some("L3T3".into()))
            .await
            .unwrap();

        let tables = registry.tables.read().await;
        let params = &tables.producers[&producer].rtp_parameters;
        assert_eq!(params.encodings[0].scalability_mode.as_deref(), Some("L3T3"));
        assert!(LayerBounds::of(params).is_layered());
    }

    #[tokio::test]
    async fn test_incompatible_consumer() {
        let (registry, _engine) = registry();
        let (alice, _rx_a) = session(&registry, 1).await;
        let (bob, _rx_b) = session(&registry, 2).await;
        let send = transport(&registry, alice, Direction::Send).await;
        let recv = transport(&registry, bob, Direction::Recv).await;

        let producer = registry
            .create_producer(alice, send.id, MediaKind::Video, vp8(1), None)
            .await
            .unwrap();

        let audio_only = RtpCapabilities {
            codecs: registry
                .router_capabilities()
                .codecs_of(MediaKind::Audio)
                .cloned()
                .collect(),
            header_extensions: vec![],
        };
        assert!(matches!(
            registry.create_consumer(bob, recv.id, producer, audio_only).await,
            Err(RegistryError::IncompatibleCapabilities(_))
        ));
        assert_eq!(registry.snapshot().await.consumers, 0);
    }

    #[tokio::test]
    async fn test_producer_close_cascades_to_consumers() {
        let (registry, engine) = registry();
        let (alice, _rx_a) = session(&registry, 1).await;
        let (bob, mut rx_b) = session(&registry, 2).await;
        let send = transport(&registry, alice, Direction::Send).await;
        let recv = transport(&registry, bob, Direction::Recv).await;

        let producer = registry
            .create_producer(alice, send.id, MediaKind::Audio, opus(), None)
            .await
            .unwrap();
        let caps = registry.router_capabilities().clone();
        let consumer = registry
            .create_consumer(bob, recv.id, producer, caps)
            .await
            .unwrap();
        let _ = rx_b.try_recv(); // new-producer

        // only the owner may close it
        assert!(registry.close_producer(bob, producer).await.is_err());

        registry.close_producer(alice, producer).await.unwrap();
        match rx_b.try_recv().unwrap() {
            Notification::ConsumerClosed(closed) => {
                assert_eq!(closed.consumer_id, consumer.consumer_id);
                assert_eq!(closed.producer_id, producer);
            }
            other => panic!("unexpected notification {:?}", other),
        }

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.producers, 0);
        assert_eq!(snapshot.consumers, 0);
        assert_eq!(engine.live_resources(), 2);
    }

    #[tokio::test]
    async fn test_producer_pause_propagates() {
        let (registry, _engine) = registry();
        let (alice, _rx_a) = session(&registry, 1).await;
        let (bob, mut rx_b) = session(&registry, 2).await;
        let send = transport(&registry, alice, Direction::Send).await;
        let recv = transport(&registry, bob, Direction::Recv).await;

        let producer = registry
            .create_producer(alice, send.id, MediaKind::Audio, opus(), None)
            .await
            .unwrap();
        let caps = registry.router_capabilities().clone();
        let consumer = registry
            .create_consumer(bob, recv.id, producer, caps)
            .await
            .unwrap();
        let _ = rx_b.try_recv();

        registry.pause_producer(alice, producer).await.unwrap();
        assert_eq!(
            rx_b.try_recv().unwrap(),
            Notification::ConsumerPaused(ConsumerRef {
                consumer_id: consumer.consumer_id
            })
        );

        registry.resume_producer(alice, producer).await.unwrap();
        assert_eq!(
            rx_b.try_recv().unwrap(),
            Notification::ConsumerResumed(ConsumerRef {
                consumer_id: consumer.consumer_id
            })
        );
    }

    #[tokio::test]
    async fn test_destroy_session_cascade() {
        let (registry, engine) = registry();
        let (alice, _rx_a) = session(&registry, 1).await;
        let (bob, mut rx_b) = session(&registry, 2).await;
        let a_send = transport(&registry, alice, Direction::Send).await;
        let a_recv = transport(&registry, alice, Direction::Recv).await;
        let b_send = transport(&registry, bob, Direction::Send).await;
        let b_recv = transport(&registry, bob, Direction::Recv).await;
        let caps = registry.router_capabilities().clone();

        let a_video = registry
            .create_producer(alice, a_send.id, MediaKind::Video, vp8(3), None)
            .await
            .unwrap();
        let b_audio = registry
            .create_producer(bob, b_send.id, MediaKind::Audio, opus(), None)
            .await
            .unwrap();
        let b_consumer = registry
            .create_consumer(bob, b_recv.id, a_video, caps.clone())
            .await
            .unwrap();
        registry
            .create_consumer(alice, a_recv.id, b_audio, caps)
            .await
            .unwrap();
        while rx_b.try_recv().is_ok() {}

        assert!(registry.destroy_session(alice).await);

        // bob loses the consumer fed by alice and keeps his own producer
        match rx_b.try_recv().unwrap() {
            Notification::ConsumerClosed(closed) => {
                assert_eq!(closed.consumer_id, b_consumer.consumer_id);
            }
            other => panic!("unexpected notification {:?}", other),
        }
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.sessions, 1);
        assert_eq!(snapshot.transports, 2);
        assert_eq!(snapshot.producers, 1);
        assert_eq!(snapshot.consumers, 0);
        assert_eq!(registry.producer_owner(b_audio).await.unwrap(), bob);
        assert_eq!(engine.live_resources(), 3);

        // dependents are released before the transports hosting them
        let closed = engine.closed_resources();
        let first_transport = closed
            .iter()
            .position(|r| matches!(r, EngineResource::Transport(_)))
            .unwrap();
        assert!(closed[first_transport..]
            .iter()
            .all(|r| matches!(r, EngineResource::Transport(_))));
    }
}
