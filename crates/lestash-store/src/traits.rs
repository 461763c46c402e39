use std::collections::BTreeMap;

use lestash_types::{ChangeEntry, DbVersion, ProtocolDescriptor, SiteId};

use crate::error::StoreResult;
use crate::index::SearchHit;

/// Change log visible at one database version.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeSnapshot {
    pub site_id: SiteId,
    pub db_version: DbVersion,
    pub changes: Vec<ChangeEntry>,
}

/// Local relational store with a causal change log.
///
/// Implementations must satisfy:
/// - `apply` is idempotent per entry: re-applying an entry that is already
///   reflected is a no-op that still counts toward the applied total.
/// - `apply` either merges the whole batch or none of it.
/// - `apply` does not maintain the text index; call `rebuild_index` after.
/// - `changes_since` returns entries in ascending `(db_version, seq)` order.
/// - `db_version` never decreases.
pub trait ChangeLogStore: Send + Sync {
    /// Stable identifier of this replica.
    fn site_id(&self) -> StoreResult<SiteId>;

    /// Current logical database version.
    fn db_version(&self) -> StoreResult<DbVersion>;

    /// Site id and database version read together.
    fn identity(&self) -> StoreResult<(SiteId, DbVersion)> {
        Ok((self.site_id()?, self.db_version()?))
    }

    /// Entries written after `since`, in causal order.
    fn changes_since(&self, since: DbVersion) -> StoreResult<Vec<ChangeEntry>>;

    /// The version and the entries after `since`, read together.
    ///
    /// The default reads the version first, so the reported version is never
    /// ahead of the returned entries. Backends with real transactions should
    /// read both under one.
    fn snapshot_since(&self, since: DbVersion) -> StoreResult<ChangeSnapshot> {
        let site_id = self.site_id()?;
        let db_version = self.db_version()?;
        let changes = self
            .changes_since(since)?
            .into_iter()
            .filter(|c| c.db_version <= db_version)
            .collect();
        Ok(ChangeSnapshot { site_id, db_version, changes })
    }

    /// Merge remote entries, returning how many were accepted.
    ///
    /// Malformed entries and entries for tables this store does not
    /// replicate are skipped and not counted.
    fn apply(&self, entries: &[ChangeEntry]) -> StoreResult<usize>;

    /// Rebuild the derived text index from scratch. Returns indexed row count.
    fn rebuild_index(&self) -> StoreResult<usize>;

    /// Search the text index.
    fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>>;

    /// Number of tracked clock records per replicated table.
    fn table_change_counts(&self) -> StoreResult<BTreeMap<String, usize>>;

    /// The sync capability this store speaks.
    fn descriptor(&self) -> ProtocolDescriptor {
        ProtocolDescriptor::current()
    }
}

/// Split a batch into entries to merge and a count of skipped ones.
pub(crate) fn acceptable<'a>(
    entries: &'a [ChangeEntry],
    descriptor: &ProtocolDescriptor,
) -> (Vec<&'a ChangeEntry>, usize) {
    let mut accepted = Vec::with_capacity(entries.len());
    let mut skipped = 0;
    for entry in entries {
        if let Some(reason) = entry.malformed_reason() {
            tracing::warn!(table = %entry.table, pk = %entry.pk, reason, "skipping malformed change entry");
            skipped += 1;
        } else if !descriptor.replicates(&entry.table) {
            tracing::warn!(table = %entry.table, "skipping change entry for table that is not replicated");
            skipped += 1;
        } else {
            accepted.push(entry);
        }
    }
    (accepted, skipped)
}
