//! Configuration
//!
//! Plain struct dengan `Default`. Tidak ada flag runtime atau environment
//! variable: binary memakai nilai default apa adanya.

use std::net::{Ipv4Addr, SocketAddr};

use tracing::Level;

use crate::network::{MAX_OUTBOUND_BYTES, READ_BUFFER_SIZE};

/// Well-known TCP port of the reference server.
pub const DEFAULT_PORT: u16 = 34400;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Kapasitas `mio::Events` per wake
    pub events_capacity: usize,
    pub max_clients: usize,
    /// Inbound buffer per client; selalu dinaikkan ke ukuran pesan maksimal
    pub read_buffer_size: usize,
    /// Lebih dari ini → `no_memory` ke client
    pub max_objects_per_client: usize,
    /// Event yang belum terkirim ke client yang tidak membaca; lebih dari
    /// ini → `no_memory`
    pub max_outbound_bytes: usize,
    pub log_level: Level,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            events_capacity: 1024,
            max_clients: 1024,
            read_buffer_size: READ_BUFFER_SIZE,
            max_objects_per_client: 4096,
            max_outbound_bytes: MAX_OUTBOUND_BYTES,
            log_level: Level::INFO,
        }
    }
}

impl ServerConfig {
    /// Ephemeral loopback port; dipakai test.
    pub fn loopback() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            ..Self::default()
        }
    }
}

/// Demo client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub max_objects: usize,
    pub log_level: Level,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            max_objects: 4096,
            log_level: Level::INFO,
        }
    }
}

/// Install the `fmt` subscriber with a fixed max level.
///
/// Aman dipanggil lebih dari sekali (test); panggilan berikutnya no-op.
pub fn init_tracing(level: Level) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 34400);
        assert!(config.bind_addr.ip().is_unspecified());
        assert_eq!(config.read_buffer_size, 64 * 1024);
        assert_eq!(config.max_outbound_bytes, 4 * 1024 * 1024);

        let client = ClientConfig::default();
        assert!(client.server_addr.ip().is_loopback());
        assert_eq!(client.server_addr.port(), DEFAULT_PORT);
    }
}
