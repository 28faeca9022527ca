//! Backend link configuration.

use std::time::Duration;

use sqlgate_pool::ChunkPool;

use crate::protocol::capabilities;

/// Configuration for a MySQL backend link.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port number (default: 3306)
    pub port: u16,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Frame chunk size for exchanges on this link
    pub chunk_size: usize,
    /// Capability flags to drive response grammar resolution
    pub capabilities: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            connect_timeout: Duration::from_secs(30),
            chunk_size: ChunkPool::DEFAULT_CHUNK_SIZE,
            capabilities: capabilities::DEFAULT_BACKEND_FLAGS,
        }
    }
}

impl BackendConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the frame chunk size.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Enable or disable CLIENT_DEPRECATE_EOF.
    ///
    /// Disabling it switches the resolver to the legacy grammar with
    /// EOF packets after column definitions.
    pub fn deprecate_eof(mut self, enabled: bool) -> Self {
        if enabled {
            self.capabilities |= capabilities::CLIENT_DEPRECATE_EOF;
        } else {
            self.capabilities &= !capabilities::CLIENT_DEPRECATE_EOF;
        }
        self
    }

    /// Replace the capability flags wholesale.
    pub fn capabilities(mut self, capabilities: u32) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Get the socket address string for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The capability flags this link resolves responses with.
    pub fn capability_flags(&self) -> u32 {
        self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_chain() {
        let config = BackendConfig::new()
            .host("db.internal")
            .port(3307)
            .chunk_size(4096)
            .deprecate_eof(false);
        assert_eq!(config.socket_addr(), "db.internal:3307");
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(
            config.capability_flags() & capabilities::CLIENT_DEPRECATE_EOF,
            0
        );
    }

    #[test]
    fn defaults_carry_deprecate_eof() {
        let config = BackendConfig::default();
        assert_ne!(
            config.capability_flags() & capabilities::CLIENT_DEPRECATE_EOF,
            0
        );
    }
}
