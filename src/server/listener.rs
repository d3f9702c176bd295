//! Signaling server listener
//!
//! Handles the TCP accept loop, spawns connection handlers and watches the
//! media engine. Losing the engine is fatal: the server stops and reports it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};

use crate::engine::EngineEvent;
use crate::error::{Error, Result};
use crate::registry::{ResourceRegistry, SessionId};
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::stats::{ConnectionCounters, ServerStats};

/// Signaling server
pub struct SignalServer {
    config: ServerConfig,
    registry: Arc<ResourceRegistry>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    counters: Arc<ConnectionCounters>,
    engine_events: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl SignalServer {
    /// Create a server over a registry and the event channel of its engine
    pub fn new(
        config: ServerConfig,
        registry: Arc<ResourceRegistry>,
        engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            registry,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
            counters: Arc::new(ConnectionCounters::new()),
            engine_events: Mutex::new(Some(engine_events)),
        }
    }

    /// Get a reference to the resource registry
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Connection counters since start
    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Bind the configured address and serve until `shutdown` resolves
    ///
    /// Returns `Error::EngineDied` if the media engine goes away first.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Signaling server listening");

        let stats_handle = self
            .config
            .stats_enabled
            .then(|| self.registry.spawn_stats_task());

        let events = self
            .engine_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut pump = events.map(|rx| self.registry.spawn_event_pump(rx));

        let engine_gone = async {
            match pump.as_mut() {
                Some(handle) => match handle.await {
                    Ok(reason) => reason,
                    Err(e) => format!("engine event task failed: {}", e),
                },
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            reason = engine_gone => {
                tracing::error!(reason = %reason, "Media engine lost, stopping server");
                Err(Error::EngineDied(reason))
            }
            result = self.accept_loop(&listener) => result,
        };

        if let Some(handle) = stats_handle {
            handle.abort();
        }
        if let Some(handle) = pump {
            handle.abort();
        }

        let closed = self.registry.close_all().await;
        tracing::info!(sessions = closed, "Signaling server stopped");

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.counters.rejected();
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));

        tracing::debug!(
            session_id = %session_id,
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);
        let counters = Arc::clone(&self.counters);
        counters.opened();

        tokio::spawn(async move {
            // held for the lifetime of the connection
            let _permit = permit;

            let connection = Connection::new(session_id, socket, peer_addr, config, registry);
            if let Err(e) = connection.run().await {
                tracing::debug!(
                    session_id = %session_id,
                    error = %e,
                    "Connection error"
                );
            }

            counters.closed();
            tracing::debug!(session_id = %session_id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use super::*;
    use crate::engine::LoopbackEngine;
    use crate::protocol::message::{Outcome, ResponseBody};

    async fn start(
        config: ServerConfig,
    ) -> (
        SocketAddr,
        Arc<LoopbackEngine>,
        tokio::task::JoinHandle<Result<()>>,
        tokio::sync::oneshot::Sender<()>,
    ) {
        let (engine, events) = LoopbackEngine::new();
        let engine = Arc::new(engine);
        let registry = Arc::new(ResourceRegistry::new(engine.clone()));
        let server = SignalServer::new(config.disable_stats(), registry, events);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });
        (addr, engine, handle, stop_tx)
    }

    #[tokio::test]
    async fn test_request_over_tcp() {
        let (addr, _engine, handle, stop) = start(ServerConfig::default()).await;

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"{\"id\":3,\"request\":{\"method\":\"get-capabilities\"}}\n")
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        match serde_json::from_str::<crate::protocol::ServerMessage>(&line).unwrap() {
            crate::protocol::ServerMessage::Response(r) => {
                assert_eq!(r.id, 3);
                assert!(matches!(r.outcome, Outcome::Ok(ResponseBody::Capabilities(_))));
            }
            other => panic!("unexpected message {:?}", other),
        }

        write.write_all(b"{\"id\":4,\"request\":{\"method\":\"fly\"}}\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["response"]["id"], 4);
        assert_eq!(value["response"]["outcome"]["error"]["code"], "bad-request");

        stop.send(()).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_engine_death_stops_server() {
        let (_addr, engine, handle, _stop) = start(ServerConfig::default()).await;

        engine.kill("worker crashed");
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::EngineDied(reason)) if reason == "worker crashed"));
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (addr, _engine, _handle, _stop) = start(ServerConfig::default().max_connections(1)).await;

        let _first = TcpStream::connect(addr).await.unwrap();
        // give the accept loop a moment to register the first connection
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = TcpStream::connect(addr).await.unwrap();
        let mut lines = BufReader::new(second).lines();
        // rejected connections are dropped without a response
        let next = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap();
        assert!(matches!(next, Ok(None) | Err(_)));
    }
}
