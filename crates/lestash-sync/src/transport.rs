use async_trait::async_trait;

use lestash_protocol::{ChangesResponse, StatusResponse};
use lestash_types::{DbVersion, Peer};

use crate::error::SyncResult;

/// Client side of the two remote sync operations.
///
/// Implementations are stateless apart from connection reuse. Each call
/// carries its own timeout, and none of them retries.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// `GET /sync/status` on the peer.
    async fn fetch_status(&self, peer: &Peer) -> SyncResult<StatusResponse>;

    /// `GET /sync/changes?since=` on the peer.
    async fn fetch_changes(&self, peer: &Peer, since: DbVersion) -> SyncResult<ChangesResponse>;
}
