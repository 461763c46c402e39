//! The [`PeerRegistry`] trait defining durable peer bookkeeping.

use chrono::{DateTime, Utc};

use lestash_types::{DbVersion, NewPeer, Peer, PeerId, SiteId};

use crate::error::{RegistryError, RegistryResult};

/// Storage backend for known peers.
///
/// Implementations must be thread-safe and make every mutation atomic.
/// Reads reflect the last committed write. The registry adds no locking of
/// its own beyond what the backend needs for atomicity.
pub trait PeerRegistry: Send + Sync {
    /// Register a new peer with `last_synced_version = 0`.
    fn add(&self, peer: &NewPeer) -> RegistryResult<Peer>;

    /// Look up a peer by id. Returns `Ok(None)` if it does not exist.
    fn get(&self, id: PeerId) -> RegistryResult<Option<Peer>>;

    /// All registered peers, ordered by id.
    fn list(&self) -> RegistryResult<Vec<Peer>>;

    /// Record a successful sync.
    ///
    /// Sets the site id if it was unknown, advances the watermark to
    /// `version` (never backwards), and stamps `synced_at`.
    fn update_sync_status(
        &self,
        id: PeerId,
        site_id: SiteId,
        version: DbVersion,
        synced_at: DateTime<Utc>,
    ) -> RegistryResult<Peer>;

    /// Change a peer's network location. Sync bookkeeping is preserved.
    fn update_address(&self, id: PeerId, address: &str, port: u16) -> RegistryResult<Peer>;

    /// Delete a peer. Returns `true` if it existed.
    fn remove(&self, id: PeerId) -> RegistryResult<bool>;

    /// Look up a peer by its exact name.
    fn find_by_name(&self, name: &str) -> RegistryResult<Option<Peer>> {
        Ok(self.list()?.into_iter().find(|p| p.name == name))
    }

    /// Fetch a peer that must exist.
    fn require(&self, id: PeerId) -> RegistryResult<Peer> {
        self.get(id)?.ok_or(RegistryError::NotFound { id })
    }
}

/// Apply a successful sync to a peer record in place.
pub(crate) fn record_sync(
    peer: &mut Peer,
    site_id: SiteId,
    version: DbVersion,
    synced_at: DateTime<Utc>,
) -> RegistryResult<()> {
    match peer.site_id {
        Some(recorded) if recorded != site_id => {
            return Err(RegistryError::SiteConflict { id: peer.id, recorded, reported: site_id });
        }
        _ => peer.site_id = Some(site_id),
    }
    if version < peer.last_synced_version {
        tracing::warn!(
            peer = %peer.name,
            recorded = peer.last_synced_version,
            reported = version,
            "remote version went backwards; keeping recorded watermark"
        );
    } else {
        peer.last_synced_version = version;
    }
    peer.last_synced_at = Some(synced_at);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Peer {
        Peer {
            id: PeerId(1),
            site_id: None,
            name: "phone".into(),
            address: "10.0.0.2".into(),
            port: 8484,
            last_synced_version: 5,
            last_synced_at: None,
        }
    }

    #[test]
    fn first_sync_learns_site() {
        let mut p = peer();
        let site = SiteId::from_bytes([1; 16]);
        record_sync(&mut p, site, 9, Utc::now()).unwrap();
        assert_eq!(p.site_id, Some(site));
        assert_eq!(p.last_synced_version, 9);
        assert!(p.has_synced());
    }

    #[test]
    fn watermark_never_regresses() {
        let mut p = peer();
        record_sync(&mut p, SiteId::from_bytes([1; 16]), 2, Utc::now()).unwrap();
        assert_eq!(p.last_synced_version, 5);
        assert!(p.last_synced_at.is_some());
    }

    #[test]
    fn different_site_is_rejected() {
        let mut p = peer();
        p.site_id = Some(SiteId::from_bytes([1; 16]));
        let before = p.clone();
        let err = record_sync(&mut p, SiteId::from_bytes([2; 16]), 10, Utc::now()).unwrap_err();
        assert!(matches!(err, RegistryError::SiteConflict { .. }));
        assert_eq!(p, before);
    }
}
