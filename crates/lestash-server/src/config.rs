use std::net::{Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use lestash_types::DEFAULT_SYNC_PORT;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_SYNC_PORT)) }
    }
}
