use std::net::SocketAddr;

/// Runtime configuration of the relay service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address of the WebSocket listener.
    pub bind_addr: SocketAddr,

    /// Token every client must present in its handshake.  `None` accepts
    /// any client; only sensible on a trusted network.
    pub access_key: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3100)),
            access_key: None,
        }
    }
}
