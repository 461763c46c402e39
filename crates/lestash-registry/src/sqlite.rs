//! Durable peer registry on SQLite.
//!
//! Peers live in a `sync_peers` table that may share a database file with the
//! change log store. Every mutation runs in its own transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use lestash_types::{DbVersion, NewPeer, Peer, PeerId, SiteId};

use crate::error::{RegistryError, RegistryResult};
use crate::traits::{record_sync, PeerRegistry};
use crate::validate::{validate_address, validate_new_peer, validate_port};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_peers (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    site_id           TEXT,
    name              TEXT NOT NULL UNIQUE,
    address           TEXT NOT NULL,
    port              INTEGER NOT NULL,
    last_sync_version INTEGER NOT NULL DEFAULT 0,
    last_sync_at      TEXT,
    created_at        TEXT NOT NULL
);
"#;

const COLUMNS: &str = "id, site_id, name, address, port, last_sync_version, last_sync_at";

/// Raw column values of one `sync_peers` row, decoded outside the row closure.
type PeerRow = (i64, Option<String>, String, String, i64, i64, Option<String>);

pub struct SqlitePeerRegistry {
    conn: Mutex<Connection>,
}

impl SqlitePeerRegistry {
    /// Open or create a registry at `path`.
    pub fn open(path: impl AsRef<Path>) -> RegistryResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Create an in-memory registry (for testing).
    pub fn open_in_memory() -> RegistryResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> RegistryResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> RegistryResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RegistryError::LockPoisoned)
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<PeerRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn decode(raw: PeerRow) -> RegistryResult<Peer> {
    let (id, site_id, name, address, port, last_synced_version, last_synced_at) = raw;
    let site_id = match site_id.as_deref() {
        Some(hex) => SiteId::parse_optional(hex)
            .map_err(|e| RegistryError::Corrupt(format!("peer {id} site_id: {e}")))?,
        None => None,
    };
    let port = u16::try_from(port)
        .map_err(|_| RegistryError::Corrupt(format!("peer {id} port out of range: {port}")))?;
    let last_synced_at = last_synced_at
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| RegistryError::Corrupt(format!("peer {id} last_sync_at: {e}")))
        })
        .transpose()?;
    Ok(Peer {
        id: PeerId(id),
        site_id,
        name,
        address,
        port,
        last_synced_version,
        last_synced_at,
    })
}

fn fetch(conn: &Connection, id: PeerId) -> RegistryResult<Option<Peer>> {
    let raw = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM sync_peers WHERE id = ?1"),
            params![id.0],
            read_row,
        )
        .optional()?;
    raw.map(decode).transpose()
}

impl PeerRegistry for SqlitePeerRegistry {
    fn add(&self, new: &NewPeer) -> RegistryResult<Peer> {
        validate_new_peer(new)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let taken: Option<i64> = tx
            .query_row("SELECT id FROM sync_peers WHERE name = ?1", params![new.name], |r| r.get(0))
            .optional()?;
        if taken.is_some() {
            return Err(RegistryError::DuplicateName { name: new.name.clone() });
        }
        tx.execute(
            "INSERT INTO sync_peers (name, address, port, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![new.name, new.address, new.port, Utc::now().to_rfc3339()],
        )?;
        let id = PeerId(tx.last_insert_rowid());
        let peer = fetch(&tx, id)?.ok_or(RegistryError::NotFound { id })?;
        tx.commit()?;
        tracing::info!(peer = %peer.name, id = %peer.id, location = %peer.location(), "registered peer");
        Ok(peer)
    }

    fn get(&self, id: PeerId) -> RegistryResult<Option<Peer>> {
        let conn = self.lock()?;
        fetch(&conn, id)
    }

    fn list(&self) -> RegistryResult<Vec<Peer>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM sync_peers ORDER BY id"))?;
        let rows = stmt.query_map([], read_row)?;
        let mut peers = Vec::new();
        for row in rows {
            peers.push(decode(row?)?);
        }
        Ok(peers)
    }

    fn update_sync_status(
        &self,
        id: PeerId,
        site_id: SiteId,
        version: DbVersion,
        synced_at: DateTime<Utc>,
    ) -> RegistryResult<Peer> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut peer = fetch(&tx, id)?.ok_or(RegistryError::NotFound { id })?;
        record_sync(&mut peer, site_id, version, synced_at)?;
        tx.execute(
            "UPDATE sync_peers SET site_id = ?1, last_sync_version = ?2, last_sync_at = ?3 WHERE id = ?4",
            params![
                peer.site_id.map(|s| s.to_hex()),
                peer.last_synced_version,
                peer.last_synced_at.map(|t| t.to_rfc3339()),
                id.0
            ],
        )?;
        tx.commit()?;
        tracing::debug!(peer = %peer.name, version = peer.last_synced_version, "recorded sync status");
        Ok(peer)
    }

    fn update_address(&self, id: PeerId, address: &str, port: u16) -> RegistryResult<Peer> {
        validate_address(address)?;
        validate_port(port)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE sync_peers SET address = ?1, port = ?2 WHERE id = ?3",
            params![address, port, id.0],
        )?;
        if changed == 0 {
            return Err(RegistryError::NotFound { id });
        }
        let peer = fetch(&tx, id)?.ok_or(RegistryError::NotFound { id })?;
        tx.commit()?;
        Ok(peer)
    }

    fn remove(&self, id: PeerId) -> RegistryResult<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM sync_peers WHERE id = ?1", params![id.0])?;
        if removed > 0 {
            tracing::info!(id = %id, "removed peer");
        }
        Ok(removed > 0)
    }

    fn find_by_name(&self, name: &str) -> RegistryResult<Option<Peer>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM sync_peers WHERE name = ?1"),
                params![name],
                read_row,
            )
            .optional()?;
        raw.map(decode).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(n: u8) -> SiteId {
        SiteId::from_bytes([n; 16])
    }

    #[test]
    fn add_get_list() {
        let reg = SqlitePeerRegistry::open_in_memory().unwrap();
        let a = reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        reg.add(&NewPeer::new("laptop", "fd7a::2", 9000)).unwrap();
        assert_eq!(a.last_synced_version, 0);
        assert_eq!(reg.get(a.id).unwrap().unwrap(), a);
        let names: Vec<String> = reg.list().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["phone", "laptop"]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let reg = SqlitePeerRegistry::open_in_memory().unwrap();
        reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        assert!(matches!(
            reg.add(&NewPeer::new("phone", "10.0.0.3", 8484)),
            Err(RegistryError::DuplicateName { .. })
        ));
    }

    #[test]
    fn survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stash.db");
        let synced_at = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let id = {
            let reg = SqlitePeerRegistry::open(&path).unwrap();
            let p = reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
            reg.update_sync_status(p.id, site(4), 42, synced_at).unwrap();
            p.id
        };
        let reg = SqlitePeerRegistry::open(&path).unwrap();
        let p = reg.require(id).unwrap();
        assert_eq!(p.site_id, Some(site(4)));
        assert_eq!(p.last_synced_version, 42);
        assert_eq!(p.last_synced_at, Some(synced_at));
    }

    #[test]
    fn watermark_is_monotonic() {
        let reg = SqlitePeerRegistry::open_in_memory().unwrap();
        let p = reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        reg.update_sync_status(p.id, site(1), 20, Utc::now()).unwrap();
        reg.update_sync_status(p.id, site(1), 7, Utc::now()).unwrap();
        assert_eq!(reg.require(p.id).unwrap().last_synced_version, 20);
    }

    #[test]
    fn site_conflict_not_persisted() {
        let reg = SqlitePeerRegistry::open_in_memory().unwrap();
        let p = reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        reg.update_sync_status(p.id, site(1), 3, Utc::now()).unwrap();
        let before = reg.require(p.id).unwrap();
        assert!(matches!(
            reg.update_sync_status(p.id, site(2), 30, Utc::now()),
            Err(RegistryError::SiteConflict { .. })
        ));
        assert_eq!(reg.require(p.id).unwrap(), before);
    }

    #[test]
    fn update_address_and_remove() {
        let reg = SqlitePeerRegistry::open_in_memory().unwrap();
        let p = reg.add(&NewPeer::new("phone", "10.0.0.2", 8484)).unwrap();
        let moved = reg.update_address(p.id, "phone.tailnet", 8585).unwrap();
        assert_eq!(moved.base_url(), "http://phone.tailnet:8585");
        assert!(matches!(
            reg.update_address(PeerId(99), "x", 1),
            Err(RegistryError::NotFound { .. })
        ));
        assert_eq!(reg.find_by_name("phone").unwrap().unwrap().id, p.id);
        assert!(reg.remove(p.id).unwrap());
        assert!(!reg.remove(p.id).unwrap());
        assert!(reg.list().unwrap().is_empty());
    }
}
