//! Resource registry implementation
//!
//! All tables live behind one `RwLock`. Every mutation (registration, closure,
//! cascade, discovery broadcast) happens under the write guard, so two
//! concurrent operations never observe a half-applied change.
//!
//! Media engine calls are never made while the guard is held. Creation is
//! split in three steps: validate and reserve under the lock, call the engine
//! without it, then re-lock and register only if the reservation survived.
//! A session destroyed in between cancels its reservations, and the late
//! engine resource is released instead of registered.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::engine::{EngineError, EngineResource, MediaEngine};
use crate::media::RtpCapabilities;
use crate::protocol::message::{
    CloseReason, ConsumerClosed, DataConsumerClosed, DataProducerRef, Notification, ProducerRef,
};
use crate::session::state::{NotificationSender, SessionState};
use crate::stats::{SessionStats, StatusSnapshot};
use crate::transport::{
    Direction, DtlsParameters, Layer, LinkState, TransportOptions, TransportParameters,
    TransportPhase,
};

use super::config::RegistryConfig;
use super::entry::{
    CloseCause, ConsumerEntry, DataConsumerEntry, DataProducerEntry, ProducerEntry, TransportEntry,
};
use super::error::RegistryError;
use super::ids::{
    ConsumerId, DataConsumerId, DataProducerId, ProducerId, ResourceKind, SessionId, TransportId,
};

/// Order in which a departing session's resources are released
///
/// Dependents go before the resources hosting them, so no consumer ever
/// outlives its producer and no producer outlives its transport.
pub const TEARDOWN_ORDER: [ResourceKind; 5] = [
    ResourceKind::DataConsumer,
    ResourceKind::DataProducer,
    ResourceKind::Consumer,
    ResourceKind::Producer,
    ResourceKind::Transport,
];

/// In-flight creation, keyed by owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Pending {
    Transport(SessionId, TransportId),
    Producer(SessionId, ProducerId),
    Consume(SessionId, ProducerId),
    DataProducer(SessionId, DataProducerId),
    DataConsume(SessionId, DataProducerId),
}

impl Pending {
    fn session(&self) -> SessionId {
        match *self {
            Pending::Transport(s, _)
            | Pending::Producer(s, _)
            | Pending::Consume(s, _)
            | Pending::DataProducer(s, _)
            | Pending::DataConsume(s, _) => s,
        }
    }
}

#[derive(Default)]
pub(super) struct Tables {
    pub(super) sessions: HashMap<SessionId, SessionState>,
    pub(super) transports: HashMap<TransportId, TransportEntry>,
    pub(super) producers: HashMap<ProducerId, ProducerEntry>,
    pub(super) consumers: HashMap<ConsumerId, ConsumerEntry>,
    pub(super) data_producers: HashMap<DataProducerId, DataProducerEntry>,
    pub(super) data_consumers: HashMap<DataConsumerId, DataConsumerEntry>,
    pub(super) pending: HashSet<Pending>,
}

impl Tables {
    pub(super) fn session(&self, id: SessionId) -> Result<&SessionState, RegistryError> {
        self.sessions
            .get(&id)
            .filter(|s| s.is_active())
            .ok_or_else(|| RegistryError::not_found(ResourceKind::Session, id))
    }

    pub(super) fn session_mut(&mut self, id: SessionId) -> Result<&mut SessionState, RegistryError> {
        self.sessions
            .get_mut(&id)
            .filter(|s| s.is_active())
            .ok_or_else(|| RegistryError::not_found(ResourceKind::Session, id))
    }

    /// Transport owned by `session`; foreign transports look nonexistent
    pub(super) fn owned_transport(
        &self,
        session: SessionId,
        id: TransportId,
    ) -> Result<&TransportEntry, RegistryError> {
        self.transports
            .get(&id)
            .filter(|t| t.session_id == session)
            .ok_or_else(|| RegistryError::not_found(ResourceKind::Transport, id))
    }

    /// Owned transport of the given direction that can still host resources
    pub(super) fn usable_transport(
        &self,
        session: SessionId,
        id: TransportId,
        direction: Direction,
    ) -> Result<&TransportEntry, RegistryError> {
        let transport = self.owned_transport(session, id)?;

        if transport.direction != direction {
            return Err(RegistryError::InvalidDirection {
                transport_id: id,
                direction: transport.direction,
            });
        }

        match transport.negotiation.phase() {
            TransportPhase::Failed | TransportPhase::Closed => Err(RegistryError::InvalidState(
                format!("transport {} has failed", id),
            )),
            _ => Ok(transport),
        }
    }

    pub(super) fn owned_producer(
        &self,
        session: SessionId,
        id: ProducerId,
    ) -> Result<&ProducerEntry, RegistryError> {
        self.producers
            .get(&id)
            .filter(|p| p.session_id == session)
            .ok_or_else(|| RegistryError::not_found(ResourceKind::Producer, id))
    }

    pub(super) fn owned_consumer(
        &self,
        session: SessionId,
        id: ConsumerId,
    ) -> Result<&ConsumerEntry, RegistryError> {
        self.consumers
            .get(&id)
            .filter(|c| c.session_id == session)
            .ok_or_else(|| RegistryError::not_found(ResourceKind::Consumer, id))
    }

    pub(super) fn owned_data_producer(
        &self,
        session: SessionId,
        id: DataProducerId,
    ) -> Result<&DataProducerEntry, RegistryError> {
        self.data_producers
            .get(&id)
            .filter(|p| p.session_id == session)
            .ok_or_else(|| RegistryError::not_found(ResourceKind::DataProducer, id))
    }

    pub(super) fn owned_data_consumer(
        &self,
        session: SessionId,
        id: DataConsumerId,
    ) -> Result<&DataConsumerEntry, RegistryError> {
        self.data_consumers
            .get(&id)
            .filter(|c| c.session_id == session)
            .ok_or_else(|| RegistryError::not_found(ResourceKind::DataConsumer, id))
    }

    /// Whether the session has at least one receive transport
    pub(super) fn has_recv_transport(&self, session: &SessionState) -> bool {
        session
            .transports
            .iter()
            .filter_map(|id| self.transports.get(id))
            .any(|t| t.direction == Direction::Recv)
    }

    pub(super) fn notify(&self, session: SessionId, notification: Notification) -> bool {
        self.sessions
            .get(&session)
            .map(|s| s.notify(notification))
            .unwrap_or(false)
    }
}

fn notify_reason(cause: CloseCause) -> Option<CloseReason> {
    match cause {
        CloseCause::ProducerClosed => Some(CloseReason::ProducerClosed),
        CloseCause::TransportClosed => Some(CloseReason::TransportClosed),
        CloseCause::Requested | CloseCause::SessionClosed => None,
    }
}

/// Authoritative store of sessions and the media resources they own
pub struct ResourceRegistry {
    pub(super) tables: RwLock<Tables>,
    pub(super) engine: Arc<dyn MediaEngine>,
    pub(super) router_capabilities: RtpCapabilities,
    pub(super) config: RegistryConfig,
}

impl ResourceRegistry {
    /// Create a registry over a media engine with default configuration
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self::with_config(engine, RegistryConfig::default())
    }

    /// Create a registry with custom configuration
    pub fn with_config(engine: Arc<dyn MediaEngine>, config: RegistryConfig) -> Self {
        Self {
            router_capabilities: engine.rtp_capabilities(),
            tables: RwLock::new(Tables::default()),
            engine,
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Capabilities of the router every producer must match
    pub fn router_capabilities(&self) -> &RtpCapabilities {
        &self.router_capabilities
    }

    /// Run an engine call under the configured timeout
    pub(super) async fn engine_call<T, F>(
        &self,
        operation: &'static str,
        call: F,
    ) -> Result<T, RegistryError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        match tokio::time::timeout(self.config.engine_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(operation = operation, error = %e, "Media engine call failed");
                Err(RegistryError::Engine(e.to_string()))
            }
            Err(_) => {
                let timeout_ms = self.config.engine_timeout.as_millis() as u64;
                tracing::warn!(
                    operation = operation,
                    timeout_ms = timeout_ms,
                    "Media engine call timed out"
                );
                Err(RegistryError::Timeout {
                    operation,
                    timeout_ms,
                })
            }
        }
    }

    /// Release an engine-side object; failures are logged, never propagated
    pub(super) fn release_engine(&self, resource: EngineResource) {
        if let Err(e) = self.engine.close(resource) {
            tracing::warn!(resource = ?resource, error = %e, "Failed to release engine resource");
        }
    }

    /// Undo a creation whose reservation was cancelled or whose call timed out
    pub(super) fn discard_engine(&self, resource: EngineResource) {
        if let Err(e) = self.engine.close(resource) {
            tracing::debug!(resource = ?resource, error = %e, "Failed to discard engine resource");
        }
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Register a new session with its notification channel
    pub async fn create_session(
        &self,
        id: SessionId,
        notifier: NotificationSender,
    ) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;

        if tables.sessions.contains_key(&id) {
            return Err(RegistryError::DuplicateId {
                kind: ResourceKind::Session,
                id: id.to_string(),
            });
        }

        tables.sessions.insert(id, SessionState::new(id, notifier));
        tracing::info!(session_id = %id, sessions = tables.sessions.len(), "Session created");
        Ok(())
    }

    /// Tear down a session and everything it owns
    ///
    /// Idempotent: returns `false` if the session was already gone.
    pub async fn destroy_session(&self, id: SessionId) -> bool {
        let mut tables = self.tables.write().await;
        self.close_session_locked(&mut tables, id)
    }

    /// Tear down every session (server shutdown)
    pub async fn close_all(&self) -> usize {
        let mut tables = self.tables.write().await;
        let ids: Vec<SessionId> = tables.sessions.keys().copied().collect();
        for id in &ids {
            self.close_session_locked(&mut tables, *id);
        }
        ids.len()
    }

    pub async fn session_exists(&self, id: SessionId) -> bool {
        self.tables.read().await.session(id).is_ok()
    }

    pub async fn session_stats(&self, id: SessionId) -> Option<SessionStats> {
        self.tables.read().await.sessions.get(&id).map(|s| s.stats())
    }

    /// Stats of every live session, ordered by session id
    pub async fn all_session_stats(&self) -> Vec<SessionStats> {
        let tables = self.tables.read().await;
        let mut stats: Vec<SessionStats> = tables.sessions.values().map(|s| s.stats()).collect();
        stats.sort_by_key(|s| s.session_id);
        stats
    }

    /// Counts of everything the registry currently holds
    pub async fn snapshot(&self) -> StatusSnapshot {
        let tables = self.tables.read().await;

        let scores: Vec<u8> = tables
            .consumers
            .values()
            .filter_map(|c| c.score.map(|s| s.score))
            .collect();
        let average_consumer_score = (!scores.is_empty())
            .then(|| scores.iter().map(|s| *s as f32).sum::<f32>() / scores.len() as f32);

        StatusSnapshot {
            sessions: tables.sessions.len(),
            transports: tables.transports.len(),
            connected_transports: tables
                .transports
                .values()
                .filter(|t| t.negotiation.is_ready())
                .count(),
            producers: tables.producers.len(),
            paused_producers: tables.producers.values().filter(|p| p.paused).count(),
            consumers: tables.consumers.len(),
            paused_consumers: tables
                .consumers
                .values()
                .filter(|c| c.paused || c.producer_paused)
                .count(),
            data_producers: tables.data_producers.len(),
            data_consumers: tables.data_consumers.len(),
            average_consumer_score,
        }
    }

    /// Run one stats sweep
    ///
    /// Replaces per-resource polling timers: one pass over the tables at a
    /// fixed interval.
    pub async fn sweep(&self) -> StatusSnapshot {
        let snapshot = self.snapshot().await;

        if snapshot.sessions > 0 {
            tracing::info!(
                sessions = snapshot.sessions,
                transports = snapshot.transports,
                connected_transports = snapshot.connected_transports,
                producers = snapshot.producers,
                consumers = snapshot.consumers,
                data_producers = snapshot.data_producers,
                data_consumers = snapshot.data_consumers,
                avg_consumer_score = ?snapshot.average_consumer_score,
                "Registry status"
            );
        }

        for stats in self.all_session_stats().await {
            tracing::debug!(
                session_id = %stats.session_id,
                transports = stats.transports,
                producers = stats.producers,
                consumers = stats.consumers,
                duration_secs = stats.duration.as_secs(),
                "Session status"
            );
        }

        snapshot
    }

    /// Spawn the periodic stats sweep
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_stats_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.stats_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.sweep().await;
            }
        })
    }

    // -----------------------------------------------------------------------
    // Transports
    // -----------------------------------------------------------------------

    /// Create a transport owned by `session_id`
    pub async fn create_transport(
        &self,
        session_id: SessionId,
        direction: Direction,
        options: TransportOptions,
    ) -> Result<TransportParameters, RegistryError> {
        let id = TransportId::new();
        let key = Pending::Transport(session_id, id);

        {
            let mut tables = self.tables.write().await;
            tables.session(session_id)?;
            if tables.transports.contains_key(&id) {
                return Err(RegistryError::DuplicateId {
                    kind: ResourceKind::Transport,
                    id: id.to_string(),
                });
            }
            tables.pending.insert(key);
        }

        let result = self
            .engine_call(
                "create-transport",
                self.engine.create_transport(id, direction, &options),
            )
            .await;

        let mut tables = self.tables.write().await;
        let reserved = tables.pending.remove(&key);

        let parameters = match result {
            Ok(parameters) => parameters,
            Err(e) => {
                if matches!(e, RegistryError::Timeout { .. }) {
                    self.discard_engine(EngineResource::Transport(id));
                }
                return Err(e);
            }
        };

        if !reserved || tables.session(session_id).is_err() {
            self.discard_engine(EngineResource::Transport(id));
            return Err(RegistryError::not_found(ResourceKind::Session, session_id));
        }

        let entry = TransportEntry::new(session_id, direction, parameters.clone());
        tables.transports.insert(id, entry);
        if let Ok(session) = tables.session_mut(session_id) {
            session.transports.insert(id);
        }

        tracing::info!(
            session_id = %session_id,
            transport_id = %id,
            direction = %direction,
            sctp = parameters.sctp_parameters.is_some(),
            "Transport created"
        );

        Ok(parameters)
    }

    /// Supply the remote DTLS parameters of a transport
    ///
    /// Allowed once per transport. Unknown, foreign or already-connected
    /// transports are refused with `InvalidState`.
    pub async fn connect_transport(
        &self,
        session_id: SessionId,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), RegistryError> {
        if dtls_parameters.fingerprints.is_empty() {
            return Err(RegistryError::InvalidParameters(
                "DTLS parameters carry no fingerprint".into(),
            ));
        }

        {
            let mut tables = self.tables.write().await;
            tables.session(session_id)?;

            let transport = tables
                .transports
                .get_mut(&transport_id)
                .filter(|t| t.session_id == session_id)
                .ok_or_else(|| {
                    RegistryError::InvalidState(format!(
                        "transport {} was never created",
                        transport_id
                    ))
                })?;

            transport
                .negotiation
                .begin_connect(dtls_parameters.clone())
                .map_err(|e| RegistryError::InvalidState(e.to_string()))?;
        }

        let result = self
            .engine_call(
                "connect-transport",
                self.engine.connect_transport(transport_id, &dtls_parameters),
            )
            .await;

        if let Err(e) = result {
            let mut tables = self.tables.write().await;
            self.apply_link_state_locked(&mut tables, transport_id, Layer::Dtls, LinkState::Failed);
            return Err(e);
        }

        tracing::info!(
            session_id = %session_id,
            transport_id = %transport_id,
            "Transport connect parameters accepted"
        );
        Ok(())
    }

    /// Close a transport and everything it hosts
    ///
    /// Closing an already-closed transport is a no-op.
    pub async fn close_transport(
        &self,
        session_id: SessionId,
        transport_id: TransportId,
    ) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;

        match tables.transports.get(&transport_id) {
            None => Ok(()),
            Some(t) if t.session_id != session_id => Err(RegistryError::not_found(
                ResourceKind::Transport,
                transport_id,
            )),
            Some(_) => {
                self.close_transport_locked(&mut tables, transport_id, CloseCause::Requested);
                Ok(())
            }
        }
    }

    /// Current negotiation phase of a transport
    pub async fn transport_phase(&self, transport_id: TransportId) -> Option<TransportPhase> {
        self.tables
            .read()
            .await
            .transports
            .get(&transport_id)
            .map(|t| t.negotiation.phase())
    }

    // -----------------------------------------------------------------------
    // Cascades (write guard held by the caller)
    // -----------------------------------------------------------------------

    pub(super) fn close_data_consumer_locked(
        &self,
        tables: &mut Tables,
        id: DataConsumerId,
        cause: CloseCause,
    ) -> bool {
        let Some(entry) = tables.data_consumers.remove(&id) else {
            return false;
        };

        if let Some(producer) = tables.data_producers.get_mut(&entry.data_producer_id) {
            producer.data_consumers.remove(&id);
        }
        if let Some(transport) = tables.transports.get_mut(&entry.transport_id) {
            transport.data_consumers.remove(&id);
        }
        if let Some(session) = tables.sessions.get_mut(&entry.session_id) {
            session.data_consumers.remove(&id);
        }

        self.release_engine(EngineResource::DataConsumer(id));

        if let Some(reason) = notify_reason(cause) {
            tables.notify(
                entry.session_id,
                Notification::DataConsumerClosed(DataConsumerClosed {
                    data_consumer_id: id,
                    data_producer_id: entry.data_producer_id,
                    reason,
                }),
            );
        }

        tracing::debug!(
            session_id = %entry.session_id,
            data_consumer_id = %id,
            cause = ?cause,
            "Data consumer closed"
        );
        true
    }

    pub(super) fn close_data_producer_locked(
        &self,
        tables: &mut Tables,
        id: DataProducerId,
        cause: CloseCause,
    ) -> bool {
        let Some(entry) = tables.data_producers.remove(&id) else {
            return false;
        };

        for data_consumer_id in &entry.data_consumers {
            self.close_data_consumer_locked(tables, *data_consumer_id, CloseCause::ProducerClosed);
        }

        if let Some(transport) = tables.transports.get_mut(&entry.transport_id) {
            transport.data_producers.remove(&id);
        }
        if let Some(session) = tables.sessions.get_mut(&entry.session_id) {
            session.data_producers.remove(&id);
        }

        self.release_engine(EngineResource::DataProducer(id));

        if cause == CloseCause::TransportClosed {
            tables.notify(
                entry.session_id,
                Notification::DataProducerClosed(DataProducerRef {
                    data_producer_id: id,
                }),
            );
        }

        tracing::info!(
            session_id = %entry.session_id,
            data_producer_id = %id,
            data_consumers = entry.data_consumers.len(),
            cause = ?cause,
            "Data producer closed"
        );
        true
    }

    pub(super) fn close_consumer_locked(
        &self,
        tables: &mut Tables,
        id: ConsumerId,
        cause: CloseCause,
    ) -> bool {
        let Some(entry) = tables.consumers.remove(&id) else {
            return false;
        };

        if let Some(producer) = tables.producers.get_mut(&entry.producer_id) {
            producer.consumers.remove(&id);
        }
        if let Some(transport) = tables.transports.get_mut(&entry.transport_id) {
            transport.consumers.remove(&id);
        }
        if let Some(session) = tables.sessions.get_mut(&entry.session_id) {
            session.consumers.remove(&id);
        }

        self.release_engine(EngineResource::Consumer(id));

        if let Some(reason) = notify_reason(cause) {
            tables.notify(
                entry.session_id,
                Notification::ConsumerClosed(ConsumerClosed {
                    consumer_id: id,
                    producer_id: entry.producer_id,
                    reason,
                }),
            );
        }

        tracing::debug!(
            session_id = %entry.session_id,
            consumer_id = %id,
            producer_id = %entry.producer_id,
            cause = ?cause,
            "Consumer closed"
        );
        true
    }

    pub(super) fn close_producer_locked(
        &self,
        tables: &mut Tables,
        id: ProducerId,
        cause: CloseCause,
    ) -> bool {
        let Some(entry) = tables.producers.remove(&id) else {
            return false;
        };

        for consumer_id in &entry.consumers {
            self.close_consumer_locked(tables, *consumer_id, CloseCause::ProducerClosed);
        }

        if let Some(transport) = tables.transports.get_mut(&entry.transport_id) {
            transport.producers.remove(&id);
        }
        if let Some(session) = tables.sessions.get_mut(&entry.session_id) {
            session.producers.remove(&id);
        }

        self.release_engine(EngineResource::Producer(id));

        if cause == CloseCause::TransportClosed {
            tables.notify(
                entry.session_id,
                Notification::ProducerClosed(ProducerRef { producer_id: id }),
            );
        }

        tracing::info!(
            session_id = %entry.session_id,
            producer_id = %id,
            kind = %entry.kind,
            consumers = entry.consumers.len(),
            cause = ?cause,
            "Producer closed"
        );
        true
    }

    pub(super) fn close_transport_locked(
        &self,
        tables: &mut Tables,
        id: TransportId,
        cause: CloseCause,
    ) -> bool {
        let Some(mut entry) = tables.transports.remove(&id) else {
            return false;
        };

        let hosted = if cause == CloseCause::SessionClosed {
            CloseCause::SessionClosed
        } else {
            CloseCause::TransportClosed
        };

        for data_consumer_id in entry.data_consumers.drain() {
            self.close_data_consumer_locked(tables, data_consumer_id, hosted);
        }
        for data_producer_id in entry.data_producers.drain() {
            self.close_data_producer_locked(tables, data_producer_id, hosted);
        }
        for consumer_id in entry.consumers.drain() {
            self.close_consumer_locked(tables, consumer_id, hosted);
        }
        for producer_id in entry.producers.drain() {
            self.close_producer_locked(tables, producer_id, hosted);
        }

        entry.negotiation.close();
        if let Some(session) = tables.sessions.get_mut(&entry.session_id) {
            session.transports.remove(&id);
        }

        self.release_engine(EngineResource::Transport(id));

        tracing::info!(
            session_id = %entry.session_id,
            transport_id = %id,
            direction = %entry.direction,
            cause = ?cause,
            "Transport closed"
        );
        true
    }

    pub(super) fn close_session_locked(&self, tables: &mut Tables, id: SessionId) -> bool {
        let Some(session) = tables.sessions.get_mut(&id) else {
            return false;
        };

        session.close();
        let duration = session.duration();
        let data_consumers: Vec<DataConsumerId> = session.data_consumers.iter().copied().collect();
        let data_producers: Vec<DataProducerId> = session.data_producers.iter().copied().collect();
        let consumers: Vec<ConsumerId> = session.consumers.iter().copied().collect();
        let producers: Vec<ProducerId> = session.producers.iter().copied().collect();
        let transports: Vec<TransportId> = session.transports.iter().copied().collect();

        let cancelled = tables.pending.len();
        tables.pending.retain(|p| p.session() != id);
        let cancelled = cancelled - tables.pending.len();

        let cause = CloseCause::SessionClosed;
        for kind in TEARDOWN_ORDER {
            match kind {
                ResourceKind::DataConsumer => {
                    for data_consumer_id in &data_consumers {
                        self.close_data_consumer_locked(tables, *data_consumer_id, cause);
                    }
                }
                ResourceKind::DataProducer => {
                    for data_producer_id in &data_producers {
                        self.close_data_producer_locked(tables, *data_producer_id, cause);
                    }
                }
                ResourceKind::Consumer => {
                    for consumer_id in &consumers {
                        self.close_consumer_locked(tables, *consumer_id, cause);
                    }
                }
                ResourceKind::Producer => {
                    for producer_id in &producers {
                        self.close_producer_locked(tables, *producer_id, cause);
                    }
                }
                ResourceKind::Transport => {
                    for transport_id in &transports {
                        self.close_transport_locked(tables, *transport_id, cause);
                    }
                }
                ResourceKind::Session => {}
            }
        }

        tables.sessions.remove(&id);

        tracing::info!(
            session_id = %id,
            transports = transports.len(),
            producers = producers.len(),
            consumers = consumers.len(),
            cancelled_creations = cancelled,
            duration_secs = duration.as_secs(),
            sessions = tables.sessions.len(),
            "Session destroyed"
        );
        true
    }
}
