//! Request dispatch for one session
//!
//! Maps each signaling request onto the registry operation it names, always
//! on behalf of the session the connection belongs to.

use std::sync::Arc;

use crate::protocol::message::{
    ClientMessage, DataConsumerRef, DataProducerRef, ProducerRef, Request, ResponseBody,
    ServerResponse,
};
use crate::registry::{RegistryError, ResourceRegistry, SessionId};

/// Handles the requests of one signaling session
#[derive(Clone)]
pub struct SignalHandler {
    registry: Arc<ResourceRegistry>,
    session_id: SessionId,
}

impl SignalHandler {
    pub fn new(registry: Arc<ResourceRegistry>, session_id: SessionId) -> Self {
        Self {
            registry,
            session_id,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Execute one request
    pub async fn handle(&self, request: Request) -> Result<ResponseBody, RegistryError> {
        let session = self.session_id;
        let registry = &self.registry;

        let body = match request {
            Request::GetCapabilities => {
                ResponseBody::Capabilities(registry.router_capabilities().clone())
            }
            Request::GetExistingProducers => {
                ResponseBody::Producers(registry.query_existing_producers(session).await?)
            }
            Request::GetExistingDataProducers => {
                ResponseBody::DataProducers(registry.query_existing_data_producers(session).await?)
            }
            Request::CreateTransport(req) => ResponseBody::TransportCreated(
                registry
                    .create_transport(session, req.direction, req.options)
                    .await?,
            ),
            Request::ConnectTransport(req) => {
                registry
                    .connect_transport(session, req.transport_id, req.dtls_parameters)
                    .await?;
                ResponseBody::Ack
            }
            Request::CloseTransport(req) => {
                registry.close_transport(session, req.transport_id).await?;
                ResponseBody::Ack
            }
            Request::Produce(req) => {
                let producer_id = registry
                    .create_producer(
                        session,
                        req.transport_id,
                        req.kind,
                        req.rtp_parameters,
                        req.scalability_mode,
                    )
                    .await?;
                ResponseBody::ProducerCreated(ProducerRef { producer_id })
            }
            Request::CloseProducer(req) => {
                registry.close_producer(session, req.producer_id).await?;
                ResponseBody::Ack
            }
            Request::PauseProducer(req) => {
                registry.pause_producer(session, req.producer_id).await?;
                ResponseBody::Ack
            }
            Request::ResumeProducer(req) => {
                registry.resume_producer(session, req.producer_id).await?;
                ResponseBody::Ack
            }
            Request::Consume(req) => ResponseBody::ConsumerCreated(
                registry
                    .create_consumer(session, req.transport_id, req.producer_id, req.rtp_capabilities)
                    .await?,
            ),
            Request::ResumeConsumer(req) => {
                registry.resume_consumer(session, req.consumer_id).await?;
                ResponseBody::Ack
            }
            Request::PauseConsumer(req) => {
                registry.pause_consumer(session, req.consumer_id).await?;
                ResponseBody::Ack
            }
            Request::CloseConsumer(req) => {
                registry.close_consumer(session, req.consumer_id).await?;
                ResponseBody::Ack
            }
            Request::SetPreferredLayers(req) => {
                registry
                    .set_preferred_layers(session, req.consumer_id, req.spatial_layer, req.temporal_layer)
                    .await?;
                ResponseBody::Ack
            }
            Request::SetPriority(req) => {
                registry
                    .set_priority(session, req.consumer_id, req.priority)
                    .await?;
                ResponseBody::Ack
            }
            Request::ProduceData(req) => {
                let data_producer_id = registry
                    .create_data_producer(
                        session,
                        req.transport_id,
                        req.sctp_stream_parameters,
                        req.label,
                        req.protocol,
                    )
                    .await?;
                ResponseBody::DataProducerCreated(DataProducerRef { data_producer_id })
            }
            Request::ConsumeData(req) => ResponseBody::DataConsumerCreated(
                registry
                    .create_data_consumer(session, req.transport_id, req.data_producer_id)
                    .await?,
            ),
            Request::CloseDataProducer(DataProducerRef { data_producer_id }) => {
                registry.close_data_producer(session, data_producer_id).await?;
                ResponseBody::Ack
            }
            Request::CloseDataConsumer(DataConsumerRef { data_consumer_id }) => {
                registry.close_data_consumer(session, data_consumer_id).await?;
                ResponseBody::Ack
            }
        };

        Ok(body)
    }

    /// Execute one request and wrap the outcome for the wire
    pub async fn respond(&self, message: ClientMessage) -> ServerResponse {
        let method = message.request.method();

        match self.handle(message.request).await {
            Ok(body) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    request_id = message.id,
                    method = method,
                    response = body.kind(),
                    "Request handled"
                );
                ServerResponse::ok(message.id, body)
            }
            Err(e) => {
                tracing::debug!(
                    session_id = %self.session_id,
                    request_id = message.id,
                    method = method,
                    code = e.code(),
                    error = %e,
                    "Request refused"
                );
                ServerResponse::error(message.id, e.code(), e.to_string())
            }
        }
    }
}
