use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::DbVersion;
use crate::site::SiteId;

/// Port a sync server listens on unless configured otherwise.
pub const DEFAULT_SYNC_PORT: u16 = 8484;

/// Local surrogate key of a registered peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub i64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A known remote store.
///
/// `site_id` stays `None` until the first successful contact.
/// `last_synced_version` is the remote database version through which this
/// peer's changes have been fully applied locally; it never decreases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub site_id: Option<SiteId>,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub last_synced_version: DbVersion,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Peer {
    /// Base URL of the peer's sync server.
    pub fn base_url(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("http://[{}]:{}", self.address, self.port)
        } else {
            format!("http://{}:{}", self.address, self.port)
        }
    }

    /// `address:port`, for log lines.
    pub fn location(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn has_synced(&self) -> bool {
        self.last_synced_at.is_some()
    }
}

/// Registration request for a new peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPeer {
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl NewPeer {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self { name: name.into(), address: address.into(), port }
    }
}
