//! In-memory peer registry for testing and ephemeral use.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use lestash_types::{DbVersion, NewPeer, Peer, PeerId, SiteId};

use crate::error::{RegistryError, RegistryResult};
use crate::traits::{record_sync, PeerRegistry};
use crate::validate::{validate_address, validate_new_peer, validate_port};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    peers: BTreeMap<PeerId, Peer>,
}

/// An in-memory implementation of [`PeerRegistry`].
///
/// Data is lost when the registry is dropped.
#[derive(Debug, Default)]
pub struct InMemoryPeerRegistry {
    inner: RwLock<Inner>,
}

impl InMemoryPeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RegistryResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| RegistryError::LockPoisoned)
    }

    fn write(&self) -> RegistryResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| RegistryError::LockPoisoned)
    }
}

impl PeerRegistry for InMemoryPeerRegistry {
    fn add(&self, new: &NewPeer) -> RegistryResult<Peer> {
        validate_new_peer(new)?;
        let mut inner = self.write()?;
        if inner.peers.values().any(|p| p.name == new.name) {
            return Err(RegistryError::DuplicateName { name: new.name.clone() });
        }
        inner.next_id += 1;
        let peer = Peer {
            id: PeerId(inner.next_id),
            site_id: None,
            name: new.name.clone(),
            address: new.address.clone(),
            port: new.port,
            last_synced_version: 0,
            last_synced_at: None,
        };
        inner.peers.insert(peer.id, peer.clone());
        Ok(peer)
    }

    fn get(&self, id: PeerId) -> RegistryResult<Option<Peer>> {
        Ok(self.read()?.peers.get(&id).cloned())
    }

    fn list(&self) -> RegistryResult<Vec<Peer>> {
        Ok(self.read()?.peers.values().cloned().collect())
    }

    fn update_sync_status(
        &self,
        id: PeerId,
        site_id: SiteId,
        version: DbVersion,
        synced_at: DateTime<Utc>,
    ) -> RegistryResult<Peer> {
        let mut inner = self.write()?;
        let stored = inner.peers.get_mut(&id).ok_or(RegistryError::NotFound { id })?;
        let mut updated = stored.clone();
        record_sync(&mut updated, site_id, version, synced_at)?;
        *stored = updated.clone();
        Ok(updated)
    }

    fn update_address(&self, id: PeerId, address: &str, port: u16) -> RegistryResult<Peer> {
        validate_address(address)?;
        validate_port(port)?;
        let mut inner = self.write()?;
        let stored = inner.peers.get_mut(&id).ok_or(RegistryError::NotFound { id })?;
        stored.address = address.to_string();
        stored.port = port;
        Ok(stored.clone())
    }

    fn remove(&self, id: PeerId) -> RegistryResult<bool> {
        Ok(self.write()?.peers.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(n: u8) -> SiteId {
        SiteId::from_bytes([n; 16])
    }

    #[test]
    fn add_assigns_ids_and_zero_watermark() {
        let reg = InMemoryPeerRegistry::new();
        let a = reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        let b = reg.add(&NewPeer::new("laptop", "10.0.0.3", 8484)).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.last_synced_version, 0);
        assert!(a.site_id.is_none());
        assert_eq!(reg.list().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_name_rejected() {
        let reg = InMemoryPeerRegistry::new();
        reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        assert!(matches!(
            reg.add(&NewPeer::new("phone", "10.0.0.9", 8484)),
            Err(RegistryError::DuplicateName { .. })
        ));
    }

    #[test]
    fn invalid_registration_rejected() {
        let reg = InMemoryPeerRegistry::new();
        assert!(reg.add(&NewPeer::new("", "10.0.0.2", 8484)).is_err());
        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn update_sync_status_is_monotonic() {
        let reg = InMemoryPeerRegistry::new();
        let p = reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        let now = Utc::now();
        reg.update_sync_status(p.id, site(1), 10, now).unwrap();
        let after = reg.update_sync_status(p.id, site(1), 3, now).unwrap();
        assert_eq!(after.last_synced_version, 10);
        assert_eq!(reg.get(p.id).unwrap().unwrap().last_synced_version, 10);
    }

    #[test]
    fn site_conflict_leaves_record_unchanged() {
        let reg = InMemoryPeerRegistry::new();
        let p = reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        reg.update_sync_status(p.id, site(1), 4, Utc::now()).unwrap();
        let before = reg.require(p.id).unwrap();
        assert!(reg.update_sync_status(p.id, site(2), 8, Utc::now()).is_err());
        assert_eq!(reg.require(p.id).unwrap(), before);
    }

    #[test]
    fn missing_peer_errors() {
        let reg = InMemoryPeerRegistry::new();
        assert!(matches!(
            reg.update_sync_status(PeerId(7), site(1), 1, Utc::now()),
            Err(RegistryError::NotFound { id: PeerId(7) })
        ));
        assert!(reg.get(PeerId(7)).unwrap().is_none());
        assert!(!reg.remove(PeerId(7)).unwrap());
    }

    #[test]
    fn update_address_keeps_watermark() {
        let reg = InMemoryPeerRegistry::new();
        let p = reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        reg.update_sync_status(p.id, site(1), 12, Utc::now()).unwrap();
        let moved = reg.update_address(p.id, "100.64.0.7", 9000).unwrap();
        assert_eq!(moved.location(), "100.64.0.7:9000");
        assert_eq!(moved.last_synced_version, 12);
        assert!(reg.update_address(p.id, "http://x", 9000).is_err());
    }

    #[test]
    fn remove_and_find() {
        let reg = InMemoryPeerRegistry::new();
        let p = reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        assert_eq!(reg.find_by_name("phone").unwrap().unwrap().id, p.id);
        assert!(reg.remove(p.id).unwrap());
        assert!(reg.find_by_name("phone").unwrap().is_none());
    }
}
