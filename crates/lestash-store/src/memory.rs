use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use lestash_types::{causal_order, ChangeEntry, DbVersion, ProtocolDescriptor, SiteId};

use crate::error::{StoreError, StoreResult};
use crate::index::{SearchHit, TextIndex, INDEXED_TABLE};
use crate::merge::RowState;
use crate::traits::{acceptable, ChangeLogStore, ChangeSnapshot};

type RowKey = (String, String);

#[derive(Debug)]
struct State {
    site_id: SiteId,
    db_version: DbVersion,
    rows: BTreeMap<RowKey, RowState>,
    index: TextIndex,
}

/// In-memory change log store.
///
/// Intended for tests and embedding. Every operation takes the single
/// `RwLock`, so an apply is atomic with respect to local writes.
#[derive(Debug)]
pub struct InMemoryChangeLog {
    state: RwLock<State>,
    descriptor: ProtocolDescriptor,
}

impl InMemoryChangeLog {
    /// Create an empty store with a freshly generated site id.
    pub fn new() -> Self {
        Self::with_site_id(SiteId::generate())
    }

    pub fn with_site_id(site_id: SiteId) -> Self {
        Self {
            state: RwLock::new(State {
                site_id,
                db_version: 0,
                rows: BTreeMap::new(),
                index: TextIndex::new(),
            }),
            descriptor: ProtocolDescriptor::current(),
        }
    }

    /// Override the descriptor this store advertises.
    pub fn with_descriptor(mut self, descriptor: ProtocolDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }

    /// Insert or update columns of a local row. Returns the new database version.
    pub fn insert_row(&self, table: &str, pk: &str, columns: &[(&str, Value)]) -> StoreResult<DbVersion> {
        if !self.descriptor.replicates(table) {
            return Err(StoreError::ApplyRejected(format!("table {table} is not replicated")));
        }
        let columns: Vec<(String, Value)> = columns.iter().map(|(c, v)| (c.to_string(), v.clone())).collect();
        let mut state = self.write()?;
        let version = state.db_version + 1;
        let site_id = state.site_id;
        let mut seq = 0;
        let row = state.rows.entry((table.to_string(), pk.to_string())).or_default();
        row.write_local(&columns, site_id, version, &mut seq);
        let values = row.values();
        if table == INDEXED_TABLE {
            if let Some(values) = values {
                state.index.index_row(pk, &values);
            }
        }
        state.db_version = version;
        Ok(version)
    }

    /// Delete a local row. Returns `false` if it was not live.
    pub fn delete_row(&self, table: &str, pk: &str) -> StoreResult<bool> {
        let mut state = self.write()?;
        let version = state.db_version + 1;
        let site_id = state.site_id;
        let mut seq = 0;
        let Some(row) = state.rows.get_mut(&(table.to_string(), pk.to_string())) else {
            return Ok(false);
        };
        if !row.delete_local(site_id, version, &mut seq) {
            return Ok(false);
        }
        if table == INDEXED_TABLE {
            state.index.remove_row(pk);
        }
        state.db_version = version;
        Ok(true)
    }

    /// Live column values of one row.
    pub fn row(&self, table: &str, pk: &str) -> StoreResult<Option<BTreeMap<String, Value>>> {
        let state = self.read()?;
        Ok(state
            .rows
            .get(&(table.to_string(), pk.to_string()))
            .and_then(RowState::values))
    }

    /// Number of rows indexed for search.
    pub fn indexed_rows(&self) -> StoreResult<usize> {
        Ok(self.read()?.index.len())
    }
}

impl Default for InMemoryChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeLogStore for InMemoryChangeLog {
    fn site_id(&self) -> StoreResult<SiteId> {
        Ok(self.read()?.site_id)
    }

    fn db_version(&self) -> StoreResult<DbVersion> {
        Ok(self.read()?.db_version)
    }

    fn changes_since(&self, since: DbVersion) -> StoreResult<Vec<ChangeEntry>> {
        let state = self.read()?;
        Ok(collect_changes(&state, since))
    }

    fn identity(&self) -> StoreResult<(SiteId, DbVersion)> {
        let state = self.read()?;
        Ok((state.site_id, state.db_version))
    }

    fn snapshot_since(&self, since: DbVersion) -> StoreResult<ChangeSnapshot> {
        let state = self.read()?;
        Ok(ChangeSnapshot {
            site_id: state.site_id,
            db_version: state.db_version,
            changes: collect_changes(&state, since),
        })
    }

    fn apply(&self, entries: &[ChangeEntry]) -> StoreResult<usize> {
        let (accepted, skipped) = acceptable(entries, &self.descriptor);
        let mut state = self.write()?;
        let version = state.db_version + 1;
        let mut seq = 0;
        let mut changed = 0usize;
        for entry in &accepted {
            let row = state
                .rows
                .entry((entry.table.clone(), entry.pk.clone()))
                .or_default();
            if row.merge(entry, version, &mut seq).changed() {
                changed += 1;
            }
        }
        if changed > 0 {
            state.db_version = version;
        }
        tracing::debug!(applied = accepted.len(), changed, skipped, "applied change batch");
        Ok(accepted.len())
    }

    fn rebuild_index(&self) -> StoreResult<usize> {
        let mut state = self.write()?;
        let live: Vec<(String, BTreeMap<String, Value>)> = state
            .rows
            .iter()
            .filter(|((table, _), _)| table == INDEXED_TABLE)
            .filter_map(|((_, pk), row)| row.values().map(|v| (pk.clone(), v)))
            .collect();
        state
            .index
            .rebuild(live.iter().map(|(pk, values)| (pk.as_str(), values)));
        Ok(state.index.len())
    }

    fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>> {
        Ok(self.read()?.index.search(query, limit))
    }

    fn table_change_counts(&self) -> StoreResult<BTreeMap<String, usize>> {
        let state = self.read()?;
        let mut counts: BTreeMap<String, usize> = self
            .descriptor
            .replicated_tables
            .iter()
            .map(|t| (t.clone(), 0))
            .collect();
        for ((table, _), row) in &state.rows {
            *counts.entry(table.clone()).or_default() += row.entries(table, "").len();
        }
        Ok(counts)
    }

    fn descriptor(&self) -> ProtocolDescriptor {
        self.descriptor.clone()
    }
}

fn collect_changes(state: &State, since: DbVersion) -> Vec<ChangeEntry> {
    let mut changes: Vec<ChangeEntry> = state
        .rows
        .iter()
        .flat_map(|((table, pk), row)| row.entries(table, pk))
        .filter(|e| e.db_version > since)
        .collect();
    changes.sort_by(causal_order);
    changes
}
