//! Data channel lifecycle
//!
//! Data producers and consumers ride the SCTP association of a transport.
//! They follow the same ownership and cascade rules as media producers and
//! consumers.

use std::time::Instant;

use crate::engine::EngineResource;
use crate::protocol::message::DataConsumerInfo;
use crate::transport::{Direction, SctpStreamParameters};

use super::entry::{CloseCause, DataConsumerEntry, DataProducerEntry};
use super::error::RegistryError;
use super::ids::{DataConsumerId, DataProducerId, ResourceKind, SessionId, TransportId};
use super::store::{Pending, ResourceRegistry};

fn check_stream_parameters(params: &SctpStreamParameters, max_streams: u16) -> Result<(), RegistryError> {
    if params.stream_id >= max_streams {
        return Err(RegistryError::InvalidParameters(format!(
            "stream id {} exceeds the {} negotiated streams",
            params.stream_id, max_streams
        )));
    }
    if params.max_packet_life_time.is_some() && params.max_retransmits.is_some() {
        return Err(RegistryError::InvalidParameters(
            "maxPacketLifeTime and maxRetransmits are mutually exclusive".into(),
        ));
    }
    Ok(())
}

impl ResourceRegistry {
    /// Create a data producer on a send transport with SCTP enabled and
    /// announce it to every other session
    pub async fn create_data_producer(
        &self,
        session_id: SessionId,
        transport_id: TransportId,
        sctp_stream_parameters: SctpStreamParameters,
        label: String,
        protocol: String,
    ) -> Result<DataProducerId, RegistryError> {
        let id = DataProducerId::new();
        let key = Pending::DataProducer(session_id, id);

        {
            let mut tables = self.tables.write().await;
            tables.session(session_id)?;
            let transport = tables.usable_transport(session_id, transport_id, Direction::Send)?;

            let sctp = transport.parameters.sctp_parameters.as_ref().ok_or_else(|| {
                RegistryError::InvalidState(format!("transport {} has no SCTP association", transport_id))
            })?;
            check_stream_parameters(&sctp_stream_parameters, sctp.os)?;

            let taken = transport.data_producers.iter().any(|dp| {
                tables
                    .data_producers
                    .get(dp)
                    .map_or(false, |dp| dp.sctp_stream_parameters.stream_id == sctp_stream_parameters.stream_id)
            });
            if taken {
                return Err(RegistryError::InvalidParameters(format!(
                    "stream id {} already in use",
                    sctp_stream_parameters.stream_id
                )));
            }

            tables.pending.insert(key);
        }

        let result = self
            .engine_call(
                "produce-data",
                self.engine.produce_data(transport_id, id, &sctp_stream_parameters),
            )
            .await;

        let mut tables = self.tables.write().await;
        let reserved = tables.pending.remove(&key);

        if let Err(e) = result {
            if matches!(e, RegistryError::Timeout { .. }) {
                self.discard_engine(EngineResource::DataProducer(id));
            }
            return Err(e);
        }

        if !reserved || tables.session(session_id).is_err() {
            self.discard_engine(EngineResource::DataProducer(id));
            return Err(RegistryError::not_found(ResourceKind::Session, session_id));
        }
        if tables.owned_transport(session_id, transport_id).is_err() {
            self.discard_engine(EngineResource::DataProducer(id));
            return Err(RegistryError::not_found(ResourceKind::Transport, transport_id));
        }

        tables.data_producers.insert(
            id,
            DataProducerEntry {
                id,
                session_id,
                transport_id,
                sctp_stream_parameters,
                label: label.clone(),
                protocol,
                data_consumers: Default::default(),
                created_at: Instant::now(),
            },
        );
        if let Some(transport) = tables.transports.get_mut(&transport_id) {
            transport.data_producers.insert(id);
        }
        if let Ok(session) = tables.session_mut(session_id) {
            session.data_producers.insert(id);
        }

        let notified = self.broadcast_new_data_producer_locked(&tables, session_id, id);

        tracing::info!(
            session_id = %session_id,
            data_producer_id = %id,
            label = %label,
            notified = notified,
            "Data producer created"
        );

        Ok(id)
    }

    /// Create a data consumer of `data_producer_id` on a receive transport
    pub async fn create_data_consumer(
        &self,
        session_id: SessionId,
        transport_id: TransportId,
        data_producer_id: DataProducerId,
    ) -> Result<DataConsumerInfo, RegistryError> {
        let id = DataConsumerId::new();
        let key = Pending::DataConsume(session_id, data_producer_id);

        let (label, protocol) = {
            let mut tables = self.tables.write().await;
            let session = tables.session(session_id)?;
            let transport = tables.usable_transport(session_id, transport_id, Direction::Recv)?;
            if !transport.sctp_enabled() {
                return Err(RegistryError::InvalidState(format!(
                    "transport {} has no SCTP association",
                    transport_id
                )));
            }

            let producer = tables.data_producers.get(&data_producer_id).ok_or_else(|| {
                RegistryError::not_found(ResourceKind::DataProducer, data_producer_id)
            })?;

            let already = session.data_consumers.iter().any(|dc| {
                tables
                    .data_consumers
                    .get(dc)
                    .map_or(false, |dc| dc.data_producer_id == data_producer_id)
            });
            if already || tables.pending.contains(&key) {
                return Err(RegistryError::AlreadyConsuming(data_producer_id.to_string()));
            }

            let found = (producer.label.clone(), producer.protocol.clone());
            tables.pending.insert(key);
            found
        };

        let result = self
            .engine_call(
                "consume-data",
                self.engine.consume_data(transport_id, id, data_producer_id),
            )
            .await;

        let mut tables = self.tables.write().await;
        let reserved = tables.pending.remove(&key);

        let sctp_stream_parameters = match result {
            Ok(params) => params,
            Err(e) => {
                if matches!(e, RegistryError::Timeout { .. }) {
                    self.discard_engine(EngineResource::DataConsumer(id));
                }
                return Err(e);
            }
        };

        if !reserved || tables.session(session_id).is_err() {
            self.discard_engine(EngineResource::DataConsumer(id));
            return Err(RegistryError::not_found(ResourceKind::Session, session_id));
        }
        if tables.owned_transport(session_id, transport_id).is_err() {
            self.discard_engine(EngineResource::DataConsumer(id));
            return Err(RegistryError::not_found(ResourceKind::Transport, transport_id));
        }
        match tables.data_producers.get_mut(&data_producer_id) {
            Some(producer) => {
                producer.data_consumers.insert(id);
            }
            None => {
                self.discard_engine(EngineResource::DataConsumer(id));
                return Err(RegistryError::not_found(ResourceKind::DataProducer, data_producer_id));
            }
        }

        let entry = DataConsumerEntry {
            id,
            session_id,
            transport_id,
            data_producer_id,
            sctp_stream_parameters,
            label,
            protocol,
        };
        let info = entry.info();

        tables.data_consumers.insert(id, entry);
        if let Some(transport) = tables.transports.get_mut(&transport_id) {
            transport.data_consumers.insert(id);
        }
        if let Ok(session) = tables.session_mut(session_id) {
            session.data_consumers.insert(id);
        }

        tracing::info!(
            session_id = %session_id,
            data_consumer_id = %id,
            data_producer_id = %data_producer_id,
            stream_id = info.sctp_stream_parameters.stream_id,
            "Data consumer created"
        );

        Ok(info)
    }

    /// Close a data producer and every data consumer fed by it
    pub async fn close_data_producer(
        &self,
        session_id: SessionId,
        data_producer_id: DataProducerId,
    ) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;

        if !tables.data_producers.contains_key(&data_producer_id) {
            return Ok(());
        }
        tables.owned_data_producer(session_id, data_producer_id)?;
        self.close_data_producer_locked(&mut tables, data_producer_id, CloseCause::Requested);
        Ok(())
    }

    pub async fn close_data_consumer(
        &self,
        session_id: SessionId,
        data_consumer_id: DataConsumerId,
    ) -> Result<(), RegistryError> {
        let mut tables = self.tables.write().await;

        if !tables.data_consumers.contains_key(&data_consumer_id) {
            return Ok(());
        }
        tables.owned_data_consumer(session_id, data_consumer_id)?;
        self.close_data_consumer_locked(&mut tables, data_consumer_id, CloseCause::Requested);
        Ok(())
    }
}
