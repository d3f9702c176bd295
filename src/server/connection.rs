//! Per-connection signaling loop
//!
//! One task per client. Requests are handled one at a time in arrival order;
//! notifications queued for the session are written between requests.
//! Whatever way the loop ends, the session and everything it owns is torn
//! down.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{ProtocolError, Result};
use crate::protocol::codec::{decode, FrameReader, FrameWriter};
use crate::protocol::message::{ClientMessage, Notification, ServerMessage, ServerResponse};
use crate::registry::{ResourceRegistry, SessionId};
use crate::session::SignalHandler;

use super::config::ServerConfig;

/// Error code for frames that are not a valid request
pub const BAD_REQUEST: &str = "bad-request";

/// One accepted signaling connection
pub struct Connection {
    session_id: SessionId,
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    registry: Arc<ResourceRegistry>,
}

impl Connection {
    pub fn new(
        session_id: SessionId,
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: ServerConfig,
        registry: Arc<ResourceRegistry>,
    ) -> Self {
        Self {
            session_id,
            socket,
            peer_addr,
            config,
            registry,
        }
    }

    /// Serve the connection until the peer leaves or an I/O error occurs
    pub async fn run(self) -> Result<()> {
        let Connection {
            session_id,
            socket,
            peer_addr,
            config,
            registry,
        } = self;

        let (tx, notifications) = mpsc::unbounded_channel();
        registry.create_session(session_id, tx).await?;
        tracing::info!(session_id = %session_id, peer = %peer_addr, "Session connected");

        let handler = SignalHandler::new(Arc::clone(&registry), session_id);
        let result = serve(socket, &config, &handler, notifications).await;

        // disconnect is an implicit close of everything the session owns
        registry.destroy_session(session_id).await;
        tracing::info!(session_id = %session_id, peer = %peer_addr, "Session disconnected");

        result
    }
}

async fn serve(
    socket: TcpStream,
    config: &ServerConfig,
    handler: &SignalHandler,
    mut notifications: mpsc::UnboundedReceiver<Notification>,
) -> Result<()> {
    let session_id = handler.session_id();
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half, config.max_frame_size);
    let mut writer = FrameWriter::new(write_half);

    let idle_timeout = config.idle_timeout;
    let mut deadline = idle_timeout.map(|d| Instant::now() + d);

    loop {
        tokio::select! {
            frame = reader.next_frame() => {
                let frame = match frame {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return Ok(()),
                    Err(ProtocolError::FrameTooLarge { size, max }) => {
                        tracing::warn!(session_id = %session_id, size = size, max = max, "Oversized frame, closing");
                        let response = ServerResponse::error(
                            0,
                            BAD_REQUEST,
                            format!("frame of {} bytes exceeds limit of {}", size, max),
                        );
                        writer.send(&ServerMessage::Response(response)).await?;
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                };

                deadline = idle_timeout.map(|d| Instant::now() + d);

                let response = match decode::<ClientMessage>(&frame) {
                    Ok(message) => handler.respond(message).await,
                    Err(e) => {
                        tracing::debug!(session_id = %session_id, error = %e, "Malformed request");
                        ServerResponse::error(request_id(&frame), BAD_REQUEST, e.to_string())
                    }
                };
                writer.send(&ServerMessage::Response(response)).await?;
            }
            Some(notification) = notifications.recv() => {
                tracing::trace!(session_id = %session_id, event = notification.event(), "Pushing notification");
                writer.send(&ServerMessage::Notification(notification)).await?;
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                tracing::info!(session_id = %session_id, "Idle timeout, closing");
                let _ = writer.shutdown().await;
                return Ok(());
            }
        }
    }
}

/// Best-effort correlation id of a frame that failed to decode
fn request_id(frame: &[u8]) -> u64 {
    serde_json::from_slice::<serde_json::Value>(frame)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_u64()))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_recovery() {
        assert_eq!(request_id(br#"{"id":42,"request":{"method":"nope"}}"#), 42);
        assert_eq!(request_id(b"not json"), 0);
        assert_eq!(request_id(br#"{"request":{}}"#), 0);
    }
}
