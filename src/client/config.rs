//! Client configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::codec::{DEFAULT_PORT, MAX_FRAME_SIZE};

/// Signaling client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server to connect to
    pub server_addr: SocketAddr,

    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// How long a request may wait for its response
    pub request_timeout: Duration,

    /// Largest accepted frame from the server
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(20),
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    /// Create a config for the given server address
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            ..Default::default()
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr.port(), DEFAULT_PORT);
        assert_eq!(config.request_timeout, Duration::from_secs(20));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder() {
        let addr: SocketAddr = "10.0.0.2:4000".parse().unwrap();
        let config = ClientConfig::new(addr)
            .connect_timeout(Duration::from_secs(1))
            .request_timeout(Duration::from_millis(500));

        assert_eq!(config.server_addr, addr);
        assert_eq!(config.request_timeout, Duration::from_millis(500));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
    }
}
