//! Media engine event handling
//!
//! Applies asynchronous engine events (link state changes, scores, layer
//! switches, data channel messages) to the registry and forwards them to the
//! owning session.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::EngineEvent;
use crate::protocol::message::{
    ConsumerLayersChanged, ConsumerScoreChanged, DataChannelMessage, Notification, ProducerScore,
    TransportFailed,
};
use crate::transport::{Layer, LinkState};

use super::ids::TransportId;
use super::store::{ResourceRegistry, Tables};

/// Whether the engine can still serve requests after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Running,
    /// The engine is gone; nothing it held is valid any more
    Died(String),
}

impl ResourceRegistry {
    /// Apply a link state change to a transport
    ///
    /// Illegal transitions are logged and ignored. Entering `Failed` pushes
    /// `transport-failed` to the owner.
    pub(super) fn apply_link_state_locked(
        &self,
        tables: &mut Tables,
        transport_id: TransportId,
        layer: Layer,
        state: LinkState,
    ) {
        let Some(transport) = tables.transports.get_mut(&transport_id) else {
            tracing::debug!(transport_id = %transport_id, layer = %layer, state = %state, "Link state for unknown transport");
            return;
        };

        let change = match transport.negotiation.apply(layer, state) {
            Ok(change) => change,
            Err(e) => {
                tracing::debug!(transport_id = %transport_id, error = %e, "Ignoring link state change");
                return;
            }
        };

        let session_id = transport.session_id;
        let direction = transport.direction;
        let ice_state = transport.negotiation.ice;
        let dtls_state = transport.negotiation.dtls;

        if change.became_connected() {
            tracing::info!(
                session_id = %session_id,
                transport_id = %transport_id,
                direction = %direction,
                "Transport connected"
            );
        }

        if change.became_failed() {
            tracing::warn!(
                session_id = %session_id,
                transport_id = %transport_id,
                direction = %direction,
                ice = %ice_state,
                dtls = %dtls_state,
                "Transport failed"
            );
            tables.notify(
                session_id,
                Notification::TransportFailed(TransportFailed {
                    transport_id,
                    direction,
                    ice_state,
                    dtls_state,
                }),
            );
        }
    }

    /// Apply one engine event
    pub async fn handle_engine_event(&self, event: EngineEvent) -> EngineStatus {
        match event {
            EngineEvent::IceStateChanged {
                transport_id,
                state,
            } => {
                let mut tables = self.tables.write().await;
                self.apply_link_state_locked(&mut tables, transport_id, Layer::Ice, state);
            }
            EngineEvent::DtlsStateChanged {
                transport_id,
                state,
            } => {
                let mut tables = self.tables.write().await;
                self.apply_link_state_locked(&mut tables, transport_id, Layer::Dtls, state);
            }
            EngineEvent::SctpStateChanged {
                transport_id,
                state,
            } => {
                let mut tables = self.tables.write().await;
                self.apply_link_state_locked(&mut tables, transport_id, Layer::Sctp, state);
            }
            EngineEvent::ProducerScore { producer_id, score } => {
                let mut tables = self.tables.write().await;
                let Some(producer) = tables.producers.get_mut(&producer_id) else {
                    return EngineStatus::Running;
                };
                producer.score = Some(score);
                let owner = producer.session_id;
                tables.notify(
                    owner,
                    Notification::ProducerScore(ProducerScore { producer_id, score }),
                );
            }
            EngineEvent::ConsumerScore { consumer_id, score } => {
                let mut tables = self.tables.write().await;
                let Some(consumer) = tables.consumers.get_mut(&consumer_id) else {
                    return EngineStatus::Running;
                };
                consumer.score = Some(score);
                let owner = consumer.session_id;
                tables.notify(
                    owner,
                    Notification::ConsumerScore(ConsumerScoreChanged { consumer_id, score }),
                );
            }
            EngineEvent::ConsumerLayersChanged {
                consumer_id,
                layers,
            } => {
                let mut tables = self.tables.write().await;
                let Some(consumer) = tables.consumers.get_mut(&consumer_id) else {
                    return EngineStatus::Running;
                };
                consumer.current_layers = layers;
                let owner = consumer.session_id;
                tables.notify(
                    owner,
                    Notification::ConsumerLayersChanged(ConsumerLayersChanged {
                        consumer_id,
                        layers,
                    }),
                );
            }
            EngineEvent::DataMessage {
                data_consumer_id,
                payload,
            } => {
                let tables = self.tables.read().await;
                let Some(data_consumer) = tables.data_consumers.get(&data_consumer_id) else {
                    return EngineStatus::Running;
                };
                tables.notify(
                    data_consumer.session_id,
                    Notification::DataChannelMessage(DataChannelMessage {
                        data_consumer_id,
                        message: String::from_utf8_lossy(&payload).into_owned(),
                    }),
                );
            }
            EngineEvent::Died { reason } => {
                tracing::error!(reason = %reason, "Media engine died");
                return EngineStatus::Died(reason);
            }
        }

        EngineStatus::Running
    }

    /// Spawn the task feeding engine events into the registry
    ///
    /// The task ends when the engine dies or its channel closes, and yields
    /// the reason.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> tokio::task::JoinHandle<String> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let EngineStatus::Died(reason) = registry.handle_engine_event(event).await {
                    return reason;
                }
            }
            "engine event channel closed".to_string()
        })
    }
}
