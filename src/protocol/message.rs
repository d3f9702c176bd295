//! Signaling message types
//!
//! Client → server traffic is a stream of [`ClientMessage`]s, each carrying a
//! correlation id and a [`Request`]. The server answers every request with
//! exactly one [`ServerResponse`] bearing the same id, and pushes unsolicited
//! [`Notification`]s in between.
//!
//! ```text
//! {"id":3,"request":{"method":"consume","data":{"transportId":"…","producerId":"…","rtpCapabilities":{…}}}}
//! {"response":{"id":3,"outcome":{"ok":{"type":"consumer-created","data":{…}}}}}
//! {"notification":{"event":"new-producer","data":{"producerId":"…","kind":"video"}}}
//! ```

use serde::{Deserialize, Serialize};

use crate::engine::ConsumerScore;
use crate::media::{ConsumerLayers, MediaKind, RtpCapabilities, RtpParameters};
use crate::registry::ids::{ConsumerId, DataConsumerId, DataProducerId, ProducerId, SessionId, TransportId};
use crate::registry::RegistryError;
use crate::transport::{
    Direction, DtlsParameters, LinkState, SctpStreamParameters, TransportOptions,
    TransportParameters,
};

/// Label used for data producers that do not name themselves
pub const DEFAULT_DATA_LABEL: &str = "sfu-datachannel";

fn default_label() -> String {
    DEFAULT_DATA_LABEL.to_string()
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One request from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Correlation id echoed in the response
    pub id: u64,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "kebab-case")]
pub enum Request {
    GetCapabilities,
    GetExistingProducers,
    GetExistingDataProducers,
    CreateTransport(CreateTransport),
    ConnectTransport(ConnectTransport),
    CloseTransport(TransportRef),
    Produce(Produce),
    CloseProducer(ProducerRef),
    PauseProducer(ProducerRef),
    ResumeProducer(ProducerRef),
    Consume(Consume),
    ResumeConsumer(ConsumerRef),
    PauseConsumer(ConsumerRef),
    CloseConsumer(ConsumerRef),
    SetPreferredLayers(SetPreferredLayers),
    SetPriority(SetPriority),
    ProduceData(ProduceData),
    ConsumeData(ConsumeData),
    CloseDataProducer(DataProducerRef),
    CloseDataConsumer(DataConsumerRef),
}

impl Request {
    /// Method name, for logs and timeouts
    pub fn method(&self) -> &'static str {
        match self {
            Request::GetCapabilities => "get-capabilities",
            Request::GetExistingProducers => "get-existing-producers",
            Request::GetExistingDataProducers => "get-existing-data-producers",
            Request::CreateTransport(_) => "create-transport",
            Request::ConnectTransport(_) => "connect-transport",
            Request::CloseTransport(_) => "close-transport",
            Request::Produce(_) => "produce",
            Request::CloseProducer(_) => "close-producer",
            Request::PauseProducer(_) => "pause-producer",
            Request::ResumeProducer(_) => "resume-producer",
            Request::Consume(_) => "consume",
            Request::ResumeConsumer(_) => "resume-consumer",
            Request::PauseConsumer(_) => "pause-consumer",
            Request::CloseConsumer(_) => "close-consumer",
            Request::SetPreferredLayers(_) => "set-preferred-layers",
            Request::SetPriority(_) => "set-priority",
            Request::ProduceData(_) => "produce-data",
            Request::ConsumeData(_) => "consume-data",
            Request::CloseDataProducer(_) => "close-data-producer",
            Request::CloseDataConsumer(_) => "close-data-consumer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransport {
    pub direction: Direction,
    #[serde(default)]
    pub options: TransportOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransport {
    pub transport_id: TransportId,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportRef {
    pub transport_id: TransportId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Produce {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    /// SVC mode such as `L3T3`, applied to the first encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRef {
    pub producer_id: ProducerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consume {
    pub transport_id: TransportId,
    pub producer_id: ProducerId,
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRef {
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPreferredLayers {
    pub consumer_id: ConsumerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spatial_layer: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_layer: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPriority {
    pub consumer_id: ConsumerId,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceData {
    pub transport_id: TransportId,
    pub sctp_stream_parameters: SctpStreamParameters,
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default)]
    pub protocol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeData {
    pub transport_id: TransportId,
    pub data_producer_id: DataProducerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProducerRef {
    pub data_producer_id: DataProducerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConsumerRef {
    pub data_consumer_id: DataConsumerId,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Producer as announced to other sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub producer_id: ProducerId,
    pub session_id: SessionId,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProducerInfo {
    pub data_producer_id: DataProducerId,
    pub session_id: SessionId,
    pub label: String,
    pub protocol: String,
}

/// Everything a client needs to receive a consumer's media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    /// Consumers always start paused
    pub paused: bool,
    pub producer_paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConsumerInfo {
    pub data_consumer_id: DataConsumerId,
    pub data_producer_id: DataProducerId,
    pub sctp_stream_parameters: SctpStreamParameters,
    pub label: String,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ResponseBody {
    Capabilities(RtpCapabilities),
    Producers(Vec<ProducerInfo>),
    DataProducers(Vec<DataProducerInfo>),
    TransportCreated(TransportParameters),
    ProducerCreated(ProducerRef),
    ConsumerCreated(ConsumerInfo),
    DataProducerCreated(DataProducerRef),
    DataConsumerCreated(DataConsumerInfo),
    /// Request succeeded with nothing to return
    Ack,
}

impl ResponseBody {
    /// Variant name, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            ResponseBody::Capabilities(_) => "capabilities",
            ResponseBody::Producers(_) => "producers",
            ResponseBody::DataProducers(_) => "data-producers",
            ResponseBody::TransportCreated(_) => "transport-created",
            ResponseBody::ProducerCreated(_) => "producer-created",
            ResponseBody::ConsumerCreated(_) => "consumer-created",
            ResponseBody::DataProducerCreated(_) => "data-producer-created",
            ResponseBody::DataConsumerCreated(_) => "data-consumer-created",
            ResponseBody::Ack => "ack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&RegistryError> for ErrorBody {
    fn from(err: &RegistryError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok(ResponseBody),
    Error(ErrorBody),
}

/// Answer to one [`ClientMessage`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub id: u64,
    pub outcome: Outcome,
}

impl ServerResponse {
    pub fn ok(id: u64, body: ResponseBody) -> Self {
        Self {
            id,
            outcome: Outcome::Ok(body),
        }
    }

    pub fn error(id: u64, code: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Error(ErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Why a resource was closed on the server's initiative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    ProducerClosed,
    TransportClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerClosed {
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
    pub reason: CloseReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConsumerClosed {
    pub data_consumer_id: DataConsumerId,
    pub data_producer_id: DataProducerId,
    pub reason: CloseReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerScore {
    pub producer_id: ProducerId,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScoreChanged {
    pub consumer_id: ConsumerId,
    pub score: ConsumerScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayersChanged {
    pub consumer_id: ConsumerId,
    /// `None` when the consumer currently receives nothing
    pub layers: Option<ConsumerLayers>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChannelMessage {
    pub data_consumer_id: DataConsumerId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportFailed {
    pub transport_id: TransportId,
    pub direction: Direction,
    pub ice_state: LinkState,
    pub dtls_state: LinkState,
}

/// Unsolicited server → client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum Notification {
    NewProducer(ProducerInfo),
    ProducerClosed(ProducerRef),
    ProducerScore(ProducerScore),
    ConsumerClosed(ConsumerClosed),
    ConsumerPaused(ConsumerRef),
    ConsumerResumed(ConsumerRef),
    ConsumerScore(ConsumerScoreChanged),
    ConsumerLayersChanged(ConsumerLayersChanged),
    NewDataProducer(DataProducerInfo),
    DataProducerClosed(DataProducerRef),
    DataConsumerClosed(DataConsumerClosed),
    DataChannelMessage(DataChannelMessage),
    TransportFailed(TransportFailed),
}

impl Notification {
    pub fn event(&self) -> &'static str {
        match self {
            Notification::NewProducer(_) => "new-producer",
            Notification::ProducerClosed(_) => "producer-closed",
            Notification::ProducerScore(_) => "producer-score",
            Notification::ConsumerClosed(_) => "consumer-closed",
            Notification::ConsumerPaused(_) => "consumer-paused",
            Notification::ConsumerResumed(_) => "consumer-resumed",
            Notification::ConsumerScore(_) => "consumer-score",
            Notification::ConsumerLayersChanged(_) => "consumer-layers-changed",
            Notification::NewDataProducer(_) => "new-data-producer",
            Notification::DataProducerClosed(_) => "data-producer-closed",
            Notification::DataConsumerClosed(_) => "data-consumer-closed",
            Notification::DataChannelMessage(_) => "data-channel-message",
            Notification::TransportFailed(_) => "transport-failed",
        }
    }
}

/// Anything the server writes to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMessage {
    Response(ServerResponse),
    Notification(Notification),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"id":1,"request":{"method":"get-capabilities"}}"#).unwrap();
        assert_eq!(msg.id, 1);
        assert_eq!(msg.request, Request::GetCapabilities);

        let id = TransportId::new();
        let json = r#"{"id":2,"request":{"method":"create-transport","data":{"direction":"recv"}}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg.request {
            Request::CreateTransport(req) => {
                assert_eq!(req.direction, Direction::Recv);
                assert_eq!(req.options, TransportOptions::default());
            }
            other => panic!("unexpected request {:?}", other),
        }

        let json = format!(
            r#"{{"id":3,"request":{{"method":"close-transport","data":{{"transportId":"{}"}}}}}}"#,
            id
        );
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg.request, Request::CloseTransport(TransportRef { transport_id: id }));
        assert_eq!(msg.request.method(), "close-transport");
    }

    #[test]
    fn test_produce_data_label_defaults() {
        let json = format!(
            r#"{{"transportId":"{}","sctpStreamParameters":{{"streamId":3}}}}"#,
            TransportId::new()
        );
        let req: ProduceData = serde_json::from_str(&json).unwrap();
        assert_eq!(req.label, DEFAULT_DATA_LABEL);
        assert_eq!(req.protocol, "");
        assert_eq!(req.sctp_stream_parameters.stream_id, 3);
    }

    #[test]
    fn test_server_message_wire_format() {
        let producer_id = ProducerId::new();
        let msg = ServerMessage::Notification(Notification::NewProducer(ProducerInfo {
            producer_id,
            session_id: SessionId(4),
            kind: MediaKind::Video,
        }));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["notification"]["event"], "new-producer");
        assert_eq!(json["notification"]["data"]["kind"], "video");
        assert_eq!(json["notification"]["data"]["producerId"], producer_id.to_string());

        let msg = ServerMessage::Response(ServerResponse::error(9, "not-found", "gone"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["response"]["id"], 9);
        assert_eq!(json["response"]["outcome"]["error"]["code"], "not-found");

        let msg = ServerMessage::Response(ServerResponse::ok(10, ResponseBody::Ack));
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_error_body_from_registry_error() {
        let err = RegistryError::InvalidLayer("3/0".into());
        let body = ErrorBody::from(&err);
        assert_eq!(body.code, "invalid-layer");
        assert!(body.message.contains("3/0"));
    }
}
