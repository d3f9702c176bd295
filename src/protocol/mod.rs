//! Signaling protocol
//!
//! Request/response and notification messages exchanged between clients and
//! the relay, and their newline-delimited JSON framing.

pub mod codec;
pub mod message;

pub use codec::{decode, encode, FrameReader, FrameWriter, DEFAULT_PORT, MAX_FRAME_SIZE};
pub use message::{
    ClientMessage, ConsumerInfo, DataConsumerInfo, DataProducerInfo, ErrorBody, Notification,
    Outcome, ProducerInfo, Request, ResponseBody, ServerMessage, ServerResponse,
};
