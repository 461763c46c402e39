use serde::{Deserialize, Serialize};
use thiserror::Error;

use lestash_registry::RegistryError;
use lestash_store::StoreError;
use lestash_types::{PeerId, SiteId};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("timed out waiting for {url}")]
    Timeout { url: String },

    #[error("connection refused by {url}")]
    ConnectionRefused { url: String },

    #[error("could not reach {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("malformed response from {url}: {reason}")]
    MalformedResponse { url: String, reason: String },

    #[error("{url} answered HTTP {status}: {body}")]
    RemoteStatus { url: String, status: u16, body: String },

    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),

    #[error("incompatible peer: {0}")]
    Incompatible(String),

    #[error("peer {peer} was recorded as site {recorded} but now reports site {reported}; re-register it if the remote store was replaced")]
    SiteMismatch { peer: String, recorded: SiteId, reported: SiteId },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("a sync session is already in progress")]
    SessionInProgress,

    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("invalid bundle: {0}")]
    Bundle(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure classes surfaced in sync outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeout, refused connection, resolve failure, or an HTTP error status.
    Connectivity,
    /// Unexpected payload shape. Handled like connectivity: nothing applied.
    MalformedResponse,
    /// Protocol, format, or site identity mismatch.
    Incompatible,
    /// The local store failed, possibly during apply.
    Store,
    /// Peer bookkeeping failed.
    Registry,
    /// Rejected before any peer was contacted.
    Session,
    /// Offline bundle could not be read or written.
    Bundle,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. }
            | Self::ConnectionRefused { .. }
            | Self::Unreachable { .. }
            | Self::RemoteStatus { .. }
            | Self::ClientSetup(_) => ErrorKind::Connectivity,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::Incompatible(_) | Self::SiteMismatch { .. } => ErrorKind::Incompatible,
            Self::Store(_) => ErrorKind::Store,
            Self::Registry(_) | Self::PeerNotFound(_) => ErrorKind::Registry,
            Self::SessionInProgress => ErrorKind::Session,
            Self::Bundle(_) | Self::Io(_) => ErrorKind::Bundle,
        }
    }

    /// Whether the failure happened before anything was applied and a plain
    /// retry may succeed.
    pub fn is_connectivity(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connectivity | ErrorKind::MalformedResponse)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
