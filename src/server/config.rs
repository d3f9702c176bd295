//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::codec::{DEFAULT_PORT, MAX_FRAME_SIZE};

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Idle timeout (disconnect if no request arrives); `None` disables it
    pub idle_timeout: Option<Duration>,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Largest accepted signaling frame
    pub max_frame_size: usize,

    /// Run the periodic registry stats sweep
    pub stats_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            idle_timeout: None,
            tcp_nodelay: true,
            max_frame_size: MAX_FRAME_SIZE,
            stats_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the frame size limit
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size.max(1024);
        self
    }

    /// Disable the periodic stats sweep
    pub fn disable_stats(mut self) -> Self {
        self.stats_enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.max_frame_size, MAX_FRAME_SIZE);
        assert!(config.tcp_nodelay);
        assert!(config.idle_timeout.is_none());
        assert!(config.stats_enabled);
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:3100".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 3100);
    }

    #[test]
    fn test_builder_frame_size_floor() {
        let config = ServerConfig::default().max_frame_size(10);

        assert_eq!(config.max_frame_size, 1024);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_connections(50)
            .idle_timeout(Duration::from_secs(30))
            .disable_stats();

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert!(!config.stats_enabled);
    }
}
