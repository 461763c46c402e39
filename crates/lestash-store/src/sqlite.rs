use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use lestash_types::{ChangeEntry, DbVersion, ProtocolDescriptor, SiteId};

use crate::error::{StoreError, StoreResult};
use crate::index::{rank_hits, row_terms, tokenize, SearchHit, INDEXED_TABLE};
use crate::merge::{ClockRecord, RowState};
use crate::traits::{acceptable, ChangeLogStore, ChangeSnapshot};

/// Layout version of the change log tables, kept in `PRAGMA user_version`.
pub const STORE_SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lestash_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS crr_rows (
    tbl TEXT NOT NULL,
    pk  TEXT NOT NULL,
    cl  INTEGER NOT NULL,
    PRIMARY KEY (tbl, pk)
);

CREATE TABLE IF NOT EXISTS crr_clock (
    tbl         TEXT NOT NULL,
    pk          TEXT NOT NULL,
    cid         TEXT NOT NULL,
    val         TEXT NOT NULL,
    col_version INTEGER NOT NULL,
    db_version  INTEGER NOT NULL,
    site_id     BLOB,
    seq         INTEGER NOT NULL,
    PRIMARY KEY (tbl, pk, cid)
);

CREATE INDEX IF NOT EXISTS crr_clock_order ON crr_clock (db_version, seq);

CREATE TABLE IF NOT EXISTS item_search (
    term TEXT NOT NULL,
    pk   TEXT NOT NULL,
    PRIMARY KEY (term, pk)
);
"#;

/// Durable change log store on SQLite.
///
/// Every replicated row is kept as a causal length plus one clock record per
/// column. `apply` merges a batch inside a single transaction, so a failure
/// leaves the store exactly as it was.
pub struct SqliteChangeLog {
    conn: Mutex<Connection>,
    descriptor: ProtocolDescriptor,
}

impl SqliteChangeLog {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        let found: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if found > STORE_SCHEMA_VERSION {
            return Err(StoreError::SchemaTooNew { found, supported: STORE_SCHEMA_VERSION });
        }
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(&format!("PRAGMA user_version = {STORE_SCHEMA_VERSION}"))?;

        let existing: Option<String> = conn
            .query_row("SELECT value FROM lestash_meta WHERE key = 'site_id'", [], |r| r.get(0))
            .optional()?;
        let site_id = match existing {
            Some(hex) => SiteId::from_hex(&hex).map_err(|e| StoreError::Corrupt(format!("site_id: {e}")))?,
            None => {
                let site_id = SiteId::generate();
                conn.execute(
                    "INSERT INTO lestash_meta (key, value) VALUES ('site_id', ?1)",
                    params![site_id.to_hex()],
                )?;
                tracing::info!(site_id = %site_id, "initialized change log store");
                site_id
            }
        };
        conn.execute(
            "INSERT OR IGNORE INTO lestash_meta (key, value) VALUES ('db_version', '0')",
            [],
        )?;
        tracing::debug!(site_id = %site_id, "opened change log store");

        Ok(Self { conn: Mutex::new(conn), descriptor: ProtocolDescriptor::current() })
    }

    /// Override the descriptor this store advertises.
    pub fn with_descriptor(mut self, descriptor: ProtocolDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Insert or update columns of a local row. Returns the new database version.
    pub fn insert_row(&self, table: &str, pk: &str, columns: &[(&str, Value)]) -> StoreResult<DbVersion> {
        if !self.descriptor.replicates(table) {
            return Err(StoreError::ApplyRejected(format!("table {table} is not replicated")));
        }
        let columns: Vec<(String, Value)> = columns.iter().map(|(c, v)| (c.to_string(), v.clone())).collect();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let site_id = read_site_id(&tx)?;
        let version = read_db_version(&tx)? + 1;
        let mut row = load_row(&tx, table, pk)?;
        let mut seq = 0;
        row.write_local(&columns, site_id, version, &mut seq);
        save_row(&tx, table, pk, &row)?;
        if table == INDEXED_TABLE {
            index_row(&tx, pk, &row)?;
        }
        write_db_version(&tx, version)?;
        tx.commit()?;
        Ok(version)
    }

    /// Delete a local row. Returns `false` if it was not live.
    pub fn delete_row(&self, table: &str, pk: &str) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let site_id = read_site_id(&tx)?;
        let version = read_db_version(&tx)? + 1;
        let mut row = load_row(&tx, table, pk)?;
        let mut seq = 0;
        if !row.delete_local(site_id, version, &mut seq) {
            return Ok(false);
        }
        save_row(&tx, table, pk, &row)?;
        if table == INDEXED_TABLE {
            tx.execute("DELETE FROM item_search WHERE pk = ?1", params![pk])?;
        }
        write_db_version(&tx, version)?;
        tx.commit()?;
        Ok(true)
    }

    /// Live column values of one row.
    pub fn row(&self, table: &str, pk: &str) -> StoreResult<Option<BTreeMap<String, Value>>> {
        let conn = self.lock()?;
        Ok(load_row(&conn, table, pk)?.values())
    }
}

impl ChangeLogStore for SqliteChangeLog {
    fn site_id(&self) -> StoreResult<SiteId> {
        let conn = self.lock()?;
        read_site_id(&conn)
    }

    fn db_version(&self) -> StoreResult<DbVersion> {
        let conn = self.lock()?;
        read_db_version(&conn)
    }

    fn identity(&self) -> StoreResult<(SiteId, DbVersion)> {
        let conn = self.lock()?;
        Ok((read_site_id(&conn)?, read_db_version(&conn)?))
    }

    fn changes_since(&self, since: DbVersion) -> StoreResult<Vec<ChangeEntry>> {
        let conn = self.lock()?;
        read_changes(&conn, since)
    }

    fn snapshot_since(&self, since: DbVersion) -> StoreResult<ChangeSnapshot> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let snapshot = ChangeSnapshot {
            site_id: read_site_id(&tx)?,
            db_version: read_db_version(&tx)?,
            changes: read_changes(&tx, since)?,
        };
        tx.commit()?;
        Ok(snapshot)
    }

    fn apply(&self, entries: &[ChangeEntry]) -> StoreResult<usize> {
        let (accepted, skipped) = acceptable(entries, &self.descriptor);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let version = read_db_version(&tx)? + 1;
        let mut rows: BTreeMap<(String, String), RowState> = BTreeMap::new();
        let mut seq = 0;
        let mut changed = 0usize;
        for entry in &accepted {
            let key = (entry.table.clone(), entry.pk.clone());
            if !rows.contains_key(&key) {
                let loaded = load_row(&tx, &entry.table, &entry.pk)?;
                rows.insert(key.clone(), loaded);
            }
            let Some(row) = rows.get_mut(&key) else {
                continue;
            };
            if row.merge(entry, version, &mut seq).changed() {
                changed += 1;
            }
        }
        if changed > 0 {
            for ((table, pk), row) in &rows {
                save_row(&tx, table, pk, row)?;
            }
            write_db_version(&tx, version)?;
        }
        tx.commit()?;
        tracing::debug!(applied = accepted.len(), changed, skipped, "applied change batch");
        Ok(accepted.len())
    }

    fn rebuild_index(&self) -> StoreResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM item_search", [])?;
        let pks: Vec<String> = {
            let mut stmt = tx.prepare("SELECT pk FROM crr_rows WHERE tbl = ?1 AND cl % 2 = 1")?;
            let rows = stmt.query_map(params![INDEXED_TABLE], |r| r.get::<_, String>(0))?;
            let pks = rows.collect::<Result<Vec<_>, _>>()?;
            pks
        };
        let mut indexed = 0;
        for pk in &pks {
            let row = load_row(&tx, INDEXED_TABLE, pk)?;
            if index_row(&tx, pk, &row)? {
                indexed += 1;
            }
        }
        tx.commit()?;
        tracing::info!(indexed, "rebuilt text index");
        Ok(indexed)
    }

    fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT pk FROM item_search WHERE term = ?1")?;
        let mut pks = Vec::new();
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        for term in &terms {
            let rows = stmt.query_map(params![term], |r| r.get::<_, String>(0))?;
            for pk in rows {
                pks.push(pk?);
            }
        }
        Ok(rank_hits(pks.iter().map(String::as_str), limit))
    }

    fn table_change_counts(&self) -> StoreResult<BTreeMap<String, usize>> {
        let conn = self.lock()?;
        let mut counts: BTreeMap<String, usize> = self
            .descriptor
            .replicated_tables
            .iter()
            .map(|t| (t.clone(), 0))
            .collect();
        let mut stmt = conn.prepare("SELECT tbl, COUNT(*) FROM crr_clock GROUP BY tbl")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (table, count) = row?;
            counts.insert(table, usize::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }

    fn descriptor(&self) -> ProtocolDescriptor {
        self.descriptor.clone()
    }
}

fn read_site_id(conn: &Connection) -> StoreResult<SiteId> {
    let hex: String = conn.query_row("SELECT value FROM lestash_meta WHERE key = 'site_id'", [], |r| r.get(0))?;
    SiteId::from_hex(&hex).map_err(|e| StoreError::Corrupt(format!("site_id: {e}")))
}

fn read_db_version(conn: &Connection) -> StoreResult<DbVersion> {
    let raw: String = conn.query_row("SELECT value FROM lestash_meta WHERE key = 'db_version'", [], |r| r.get(0))?;
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("db_version is not an integer: {raw}")))
}

fn write_db_version(conn: &Connection, version: DbVersion) -> StoreResult<()> {
    conn.execute(
        "UPDATE lestash_meta SET value = ?1 WHERE key = 'db_version'",
        params![version.to_string()],
    )?;
    Ok(())
}

fn decode_site(blob: Option<Vec<u8>>) -> StoreResult<Option<SiteId>> {
    blob.map(|b| SiteId::from_slice(&b))
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("clock site_id: {e}")))
}

fn load_row(conn: &Connection, table: &str, pk: &str) -> StoreResult<RowState> {
    let cl: Option<i64> = conn
        .query_row(
            "SELECT cl FROM crr_rows WHERE tbl = ?1 AND pk = ?2",
            params![table, pk],
            |r| r.get(0),
        )
        .optional()?;
    let Some(cl) = cl else {
        return Ok(RowState::new());
    };

    let mut row = RowState { cl, ..RowState::default() };
    let mut stmt = conn.prepare(
        "SELECT cid, val, col_version, db_version, site_id, seq FROM crr_clock WHERE tbl = ?1 AND pk = ?2",
    )?;
    let records = stmt.query_map(params![table, pk], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, i64>(2)?,
            r.get::<_, i64>(3)?,
            r.get::<_, Option<Vec<u8>>>(4)?,
            r.get::<_, i64>(5)?,
        ))
    })?;
    for record in records {
        let (cid, val, col_version, db_version, site, seq) = record?;
        let rec = ClockRecord {
            val: serde_json::from_str(&val)?,
            col_version,
            db_version,
            site_id: decode_site(site)?,
            seq,
        };
        if cid == lestash_types::SENTINEL_CID {
            row.sentinel = Some(rec);
        } else {
            row.columns.insert(cid, rec);
        }
    }
    Ok(row)
}

fn save_row(conn: &Connection, table: &str, pk: &str, row: &RowState) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO crr_rows (tbl, pk, cl) VALUES (?1, ?2, ?3)
         ON CONFLICT (tbl, pk) DO UPDATE SET cl = excluded.cl",
        params![table, pk, row.cl],
    )?;
    conn.execute("DELETE FROM crr_clock WHERE tbl = ?1 AND pk = ?2", params![table, pk])?;
    let mut stmt = conn.prepare(
        "INSERT INTO crr_clock (tbl, pk, cid, val, col_version, db_version, site_id, seq)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for entry in row.entries(table, pk) {
        stmt.execute(params![
            table,
            pk,
            entry.cid,
            serde_json::to_string(&entry.val)?,
            entry.col_version,
            entry.db_version,
            entry.site_id.map(|s| s.as_bytes().to_vec()),
            entry.seq,
        ])?;
    }
    Ok(())
}

fn read_changes(conn: &Connection, since: DbVersion) -> StoreResult<Vec<ChangeEntry>> {
    let mut stmt = conn.prepare(
        "SELECT c.tbl, c.pk, c.cid, c.val, c.col_version, c.db_version, c.site_id, r.cl, c.seq
         FROM crr_clock c JOIN crr_rows r ON r.tbl = c.tbl AND r.pk = c.pk
         WHERE c.db_version > ?1
         ORDER BY c.db_version, c.seq",
    )?;
    let rows = stmt.query_map(params![since], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, i64>(4)?,
            r.get::<_, i64>(5)?,
            r.get::<_, Option<Vec<u8>>>(6)?,
            r.get::<_, i64>(7)?,
            r.get::<_, i64>(8)?,
        ))
    })?;
    let mut changes = Vec::new();
    for row in rows {
        let (table, pk, cid, val, col_version, db_version, site, cl, seq) = row?;
        changes.push(ChangeEntry {
            table,
            pk,
            cid,
            val: serde_json::from_str(&val)?,
            col_version,
            db_version,
            site_id: decode_site(site)?,
            cl,
            seq,
        });
    }
    Ok(changes)
}

/// Replace the search terms of one item row. Returns whether it has any.
fn index_row(conn: &Connection, pk: &str, row: &RowState) -> StoreResult<bool> {
    conn.execute("DELETE FROM item_search WHERE pk = ?1", params![pk])?;
    let Some(values) = row.values() else {
        return Ok(false);
    };
    let terms = row_terms(&values);
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO item_search (term, pk) VALUES (?1, ?2)")?;
    for term in &terms {
        stmt.execute(params![term, pk])?;
    }
    Ok(!terms.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryChangeLog;
    use serde_json::json;

    #[test]
    fn open_in_memory_starts_at_zero() {
        let s = SqliteChangeLog::open_in_memory().unwrap();
        assert_eq!(s.db_version().unwrap(), 0);
        assert!(s.changes_since(0).unwrap().is_empty());
    }

    #[test]
    fn site_id_and_data_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stash.db");
        let site = {
            let s = SqliteChangeLog::open(&path).unwrap();
            s.insert_row("items", "01", &[("title", json!("kept"))]).unwrap();
            s.site_id().unwrap()
        };
        let s = SqliteChangeLog::open(&path).unwrap();
        assert_eq!(s.site_id().unwrap(), site);
        assert_eq!(s.db_version().unwrap(), 1);
        assert_eq!(s.identity().unwrap(), (site, 1));
        assert_eq!(s.row("items", "01").unwrap().unwrap()["title"], json!("kept"));
        assert_eq!(s.search("kept", 5).unwrap().len(), 1);
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stash.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("PRAGMA user_version = 99").unwrap();
        }
        assert!(matches!(
            SqliteChangeLog::open(&path),
            Err(StoreError::SchemaTooNew { found: 99, .. })
        ));
    }

    #[test]
    fn changes_are_ordered_and_filtered() {
        let s = SqliteChangeLog::open_in_memory().unwrap();
        s.insert_row("items", "01", &[("title", json!("a"))]).unwrap();
        s.insert_row("tags", "02", &[("name", json!("b"))]).unwrap();
        let all = s.changes_since(0).unwrap();
        assert_eq!(all.len(), 4);
        assert!(lestash_types::is_causally_ordered(&all));
        let later = s.changes_since(1).unwrap();
        assert_eq!(later.len(), 2);
        assert!(later.iter().all(|c| c.table == "tags"));
    }

    #[test]
    fn merged_row_reset_keeps_log_keys_distinct() {
        let entry = ChangeEntry {
            table: "items".into(),
            pk: "01".into(),
            cid: "title".into(),
            val: json!("no sentinel first"),
            col_version: 1,
            db_version: 4,
            site_id: Some(SiteId::from_bytes([2; 16])),
            cl: 1,
            seq: 0,
        };
        let s = SqliteChangeLog::open_in_memory().unwrap();
        assert_eq!(s.apply(&[entry]).unwrap(), 1);
        let keys: Vec<(String, i64, i64)> =
            s.changes_since(0).unwrap().into_iter().map(|c| (c.cid, c.db_version, c.seq)).collect();
        assert_eq!(keys, vec![("-1".to_string(), 1, 0), ("title".to_string(), 1, 1)]);
    }

    #[test]
    fn apply_matches_memory_store_semantics() {
        let source = InMemoryChangeLog::with_site_id(SiteId::from_bytes([1; 16]));
        source.insert_row("items", "01", &[("title", json!("one")), ("author", json!("ann"))]).unwrap();
        source.insert_row("items", "02", &[("title", json!("two"))]).unwrap();
        source.delete_row("items", "02").unwrap();
        let batch = source.changes_since(0).unwrap();

        let sqlite = SqliteChangeLog::open_in_memory().unwrap();
        let memory = InMemoryChangeLog::new();
        assert_eq!(sqlite.apply(&batch).unwrap(), memory.apply(&batch).unwrap());
        assert_eq!(sqlite.row("items", "01").unwrap(), memory.row("items", "01").unwrap());
        assert!(sqlite.row("items", "02").unwrap().is_none());
    }

    #[test]
    fn reapply_keeps_count_and_version() {
        let source = InMemoryChangeLog::new();
        source.insert_row("person_profiles", "aa", &[("name", json!("Ada"))]).unwrap();
        let batch = source.changes_since(0).unwrap();
        let s = SqliteChangeLog::open_in_memory().unwrap();
        let first = s.apply(&batch).unwrap();
        let version = s.db_version().unwrap();
        assert_eq!(s.apply(&batch).unwrap(), first);
        assert_eq!(s.db_version().unwrap(), version);
    }

    #[test]
    fn rebuild_index_after_apply() {
        let source = InMemoryChangeLog::new();
        source.insert_row("items", "01", &[("content", json!("pull based replication"))]).unwrap();
        let s = SqliteChangeLog::open_in_memory().unwrap();
        s.apply(&source.changes_since(0).unwrap()).unwrap();
        assert!(s.search("replication", 5).unwrap().is_empty());
        assert_eq!(s.rebuild_index().unwrap(), 1);
        let hits = s.search("Replication pull", 5).unwrap();
        assert_eq!(hits[0].pk, "01");
        assert_eq!(hits[0].matched_terms, 2);
    }

    #[test]
    fn snapshot_reads_version_with_changes() {
        let s = SqliteChangeLog::open_in_memory().unwrap();
        s.insert_row("sources", "01", &[("name", json!("rss"))]).unwrap();
        let snap = s.snapshot_since(0).unwrap();
        assert_eq!(snap.db_version, 1);
        assert_eq!(snap.changes.len(), 2);
        assert_eq!(snap.site_id, s.site_id().unwrap());
    }

    #[test]
    fn table_counts() {
        let s = SqliteChangeLog::open_in_memory().unwrap();
        s.insert_row("tags", "01", &[("name", json!("x"))]).unwrap();
        let counts = s.table_change_counts().unwrap();
        assert_eq!(counts["tags"], 2);
        assert_eq!(counts["items"], 0);
    }
}
