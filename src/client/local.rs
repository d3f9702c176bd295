//! In-process signaler
//!
//! Drives a registry session directly, without a socket. Behaves like the
//! TCP client: requests are bounded by a timeout, errors come back as
//! `ClientError::Server` with the registry's error code, and disconnecting
//! tears the session down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ClientError;
use crate::protocol::message::{Notification, Request, ResponseBody};
use crate::registry::{ResourceRegistry, SessionId};
use crate::session::SignalHandler;

use super::Signaler;

/// Signaler bound to an in-process registry session
pub struct LocalSignaler {
    handler: SignalHandler,
    registry: Arc<ResourceRegistry>,
    request_timeout: Duration,
    connected: AtomicBool,
}

impl LocalSignaler {
    /// Open a session on `registry`
    ///
    /// Returns the signaler and the session's notification receiver.
    pub async fn connect(
        registry: Arc<ResourceRegistry>,
        session_id: SessionId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Notification>), ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry
            .create_session(session_id, tx)
            .await
            .map_err(|e| ClientError::Server {
                code: e.code().to_string(),
                message: e.to_string(),
            })?;

        let signaler = Self {
            handler: SignalHandler::new(Arc::clone(&registry), session_id),
            registry,
            request_timeout: Duration::from_secs(20),
            connected: AtomicBool::new(true),
        };
        Ok((signaler, rx))
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.handler.session_id()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Drop the session and everything it owns
    pub async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.registry.destroy_session(self.session_id()).await;
        }
    }
}

#[async_trait]
impl Signaler for LocalSignaler {
    async fn request(&self, request: Request) -> Result<ResponseBody, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::Disconnected);
        }

        let method = request.method();
        match tokio::time::timeout(self.request_timeout, self.handler.handle(request)).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(ClientError::Server {
                code: e.code().to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(ClientError::Timeout {
                method,
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}
