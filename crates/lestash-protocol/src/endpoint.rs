use serde::{Deserialize, Serialize};

use lestash_types::{DbVersion, PROTOCOL_VERSION};

use crate::error::{ProtocolError, ProtocolResult};

/// HTTP endpoint paths served by a sync peer.
pub mod endpoints {
    pub const STATUS: &str = "/sync/status";
    pub const CHANGES: &str = "/sync/changes";
    pub const HEALTH: &str = "/health";
}

/// Query string of `GET /sync/changes`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesQuery {
    #[serde(default)]
    pub since: DbVersion,
}

impl ChangesQuery {
    pub fn new(since: DbVersion) -> Self {
        Self { since }
    }

    pub fn validate(&self) -> ProtocolResult<()> {
        if self.since < 0 {
            return Err(ProtocolError::InvalidQuery(format!(
                "since must not be negative, got {}",
                self.since
            )));
        }
        Ok(())
    }
}

/// Health check response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub protocol_version: u32,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}
