//! TCP signaling client
//!
//! Correlates responses to requests by id and hands notifications to the
//! application through an unbounded channel, so a slow notification consumer
//! never holds up response delivery. Every request is bounded by the
//! configured timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::ClientError;
use crate::protocol::codec::{decode, FrameReader, FrameWriter};
use crate::protocol::message::{ClientMessage, Notification, Outcome, Request, ResponseBody, ServerMessage};

use super::config::ClientConfig;
use super::Signaler;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Signaling client over TCP
pub struct SignalClient {
    config: ClientConfig,
    next_id: AtomicU64,
    pending: PendingMap,
    writer: tokio::sync::Mutex<FrameWriter<OwnedWriteHalf>>,
    connected: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl SignalClient {
    /// Connect to the server
    ///
    /// Returns the client and a receiver for server notifications. The
    /// receiver yields `None` once the connection is gone.
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>), ClientError> {
        let socket = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect(config.server_addr),
        )
        .await
        .map_err(|_| ClientError::Timeout {
            method: "connect",
            timeout_ms: config.connect_timeout.as_millis() as u64,
        })??;
        socket.set_nodelay(true)?;

        let (read_half, write_half) = socket.into_split();
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(read_loop(
            FrameReader::new(read_half, config.max_frame_size),
            Arc::clone(&pending),
            notification_tx,
            Arc::clone(&connected),
        ));

        tracing::debug!(server = %config.server_addr, "Signaling client connected");

        let client = Self {
            config,
            next_id: AtomicU64::new(1),
            pending,
            writer: tokio::sync::Mutex::new(FrameWriter::new(write_half)),
            connected,
            reader_task,
        };

        Ok((client, notification_rx))
    }

    /// Check if the connection is still up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Close the connection
    pub async fn disconnect(&self) {
        let _ = self.writer.lock().await.shutdown().await;
        self.reader_task.abort();
        self.connected.store(false, Ordering::Release);
        lock(&self.pending).clear();
    }
}

impl Drop for SignalClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[async_trait]
impl Signaler for SignalClient {
    async fn request(&self, request: Request) -> Result<ResponseBody, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Disconnected);
        }

        let method = request.method();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);

        let sent = self
            .writer
            .lock()
            .await
            .send(&ClientMessage { id, request })
            .await;
        if let Err(e) = sent {
            lock(&self.pending).remove(&id);
            return Err(e.into());
        }

        let outcome = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(ClientError::Disconnected),
            Err(_) => {
                lock(&self.pending).remove(&id);
                tracing::warn!(request_id = id, method = method, "Request timed out");
                return Err(ClientError::Timeout {
                    method,
                    timeout_ms: self.config.request_timeout.as_millis() as u64,
                });
            }
        };

        match outcome {
            Outcome::Ok(body) => Ok(body),
            Outcome::Error(err) => Err(ClientError::Server {
                code: err.code,
                message: err.message,
            }),
        }
    }
}

async fn read_loop(
    mut reader: FrameReader<tokio::net::tcp::OwnedReadHalf>,
    pending: PendingMap,
    notifications: mpsc::UnboundedSender<Notification>,
    connected: Arc<AtomicBool>,
) {
    loop {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Signaling read failed");
                break;
            }
        };

        match decode::<ServerMessage>(&frame) {
            Ok(ServerMessage::Response(response)) => {
                match lock(&pending).remove(&response.id) {
                    Some(tx) => {
                        let _ = tx.send(response.outcome);
                    }
                    None => {
                        tracing::debug!(request_id = response.id, "Response for unknown request");
                    }
                }
            }
            Ok(ServerMessage::Notification(notification)) => {
                if notifications.send(notification).is_err() {
                    tracing::trace!("Notification receiver dropped");
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring malformed server message");
            }
        }
    }

    connected.store(false, Ordering::Release);
    // wake every waiting request with Disconnected
    lock(&pending).clear();
    tracing::debug!("Signaling client disconnected");
}
