//! Last-writer-wins resolution for one row of a replicated table.
//!
//! A row is tracked by its causal length (`cl`) plus one clock record per
//! column. An odd causal length means the row is live, an even one means it
//! has been deleted. Resolution order:
//!
//! 1. A greater causal length wins outright: the row is reset to the new
//!    causal length, dropping every column clock.
//! 2. A smaller causal length is stale.
//! 3. At equal causal length, the column with the greater
//!    `(col_version, value, site_id)` triple wins.
//!
//! Merging an entry that is already reflected in the row changes nothing,
//! which is what lets a batch be re-applied safely after a partial failure.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value;

use lestash_types::{ChangeEntry, DbVersion, SiteId, SENTINEL_CID};

/// Local position assigned to a merged or locally written record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stamp {
    pub db_version: DbVersion,
    pub seq: i64,
}

/// Clock state of one column, or of the row sentinel.
#[derive(Clone, Debug, PartialEq)]
pub struct ClockRecord {
    pub val: Value,
    pub col_version: i64,
    pub db_version: DbVersion,
    pub site_id: Option<SiteId>,
    pub seq: i64,
}

/// What merging one entry did to a row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The row already reflects this entry or something newer.
    Stale,
    /// The entry carried a greater causal length and reset the row.
    RowAdvanced,
    /// The entry won its column at the current causal length.
    ColumnWon,
}

impl MergeOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, Self::Stale)
    }
}

/// Merged state of a single `(table, pk)` row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowState {
    pub cl: i64,
    pub sentinel: Option<ClockRecord>,
    pub columns: BTreeMap<String, ClockRecord>,
}

impl RowState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_live(&self) -> bool {
        self.cl % 2 == 1
    }

    /// Merge a remote entry into this row at local version `db_version`.
    ///
    /// `next_seq` is advanced once per clock record written, so a row reset
    /// that also wins a column takes two sequence numbers.
    pub fn merge(&mut self, entry: &ChangeEntry, db_version: DbVersion, next_seq: &mut i64) -> MergeOutcome {
        match entry.cl.cmp(&self.cl) {
            Ordering::Less => MergeOutcome::Stale,
            Ordering::Greater => {
                self.cl = entry.cl;
                self.columns.clear();
                self.sentinel = Some(ClockRecord {
                    val: Value::Null,
                    col_version: entry.cl,
                    db_version,
                    site_id: entry.site_id,
                    seq: take_seq(next_seq),
                });
                if !entry.is_tombstone() && !entry.is_sentinel() {
                    let stamp = Stamp { db_version, seq: take_seq(next_seq) };
                    self.columns.insert(entry.cid.clone(), record_from(entry, stamp));
                }
                MergeOutcome::RowAdvanced
            }
            Ordering::Equal => {
                if entry.is_tombstone() || entry.is_sentinel() {
                    return MergeOutcome::Stale;
                }
                let wins = match self.columns.get(&entry.cid) {
                    None => true,
                    Some(current) => compare_clock(entry, current) == Ordering::Greater,
                };
                if wins {
                    let stamp = Stamp { db_version, seq: take_seq(next_seq) };
                    self.columns.insert(entry.cid.clone(), record_from(entry, stamp));
                    MergeOutcome::ColumnWon
                } else {
                    MergeOutcome::Stale
                }
            }
        }
    }

    /// Record a local insert or update of `columns`.
    ///
    /// A deleted or unseen row is brought back to life with the next odd
    /// causal length first. `next_seq` is advanced once per record written.
    pub fn write_local(
        &mut self,
        columns: &[(String, Value)],
        site_id: SiteId,
        db_version: DbVersion,
        next_seq: &mut i64,
    ) {
        if !self.is_live() {
            self.cl += 1;
            self.columns.clear();
            self.sentinel = Some(ClockRecord {
                val: Value::Null,
                col_version: self.cl,
                db_version,
                site_id: Some(site_id),
                seq: take_seq(next_seq),
            });
        }
        for (cid, val) in columns {
            let col_version = self.columns.get(cid).map_or(1, |c| c.col_version + 1);
            self.columns.insert(
                cid.clone(),
                ClockRecord {
                    val: val.clone(),
                    col_version,
                    db_version,
                    site_id: Some(site_id),
                    seq: take_seq(next_seq),
                },
            );
        }
    }

    /// Record a local delete. Returns `false` if the row was not live.
    pub fn delete_local(&mut self, site_id: SiteId, db_version: DbVersion, next_seq: &mut i64) -> bool {
        if !self.is_live() {
            return false;
        }
        self.cl += 1;
        self.columns.clear();
        self.sentinel = Some(ClockRecord {
            val: Value::Null,
            col_version: self.cl,
            db_version,
            site_id: Some(site_id),
            seq: take_seq(next_seq),
        });
        true
    }

    /// Current column values, or `None` if the row is not live.
    pub fn values(&self) -> Option<BTreeMap<String, Value>> {
        if !self.is_live() {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|(cid, rec)| (cid.clone(), rec.val.clone()))
                .collect(),
        )
    }

    /// Change log entries describing this row, sentinel first.
    pub fn entries(&self, table: &str, pk: &str) -> Vec<ChangeEntry> {
        let to_entry = |cid: &str, rec: &ClockRecord| ChangeEntry {
            table: table.to_string(),
            pk: pk.to_string(),
            cid: cid.to_string(),
            val: rec.val.clone(),
            col_version: rec.col_version,
            db_version: rec.db_version,
            site_id: rec.site_id,
            cl: self.cl,
            seq: rec.seq,
        };
        self.sentinel
            .iter()
            .map(|rec| to_entry(SENTINEL_CID, rec))
            .chain(self.columns.iter().map(|(cid, rec)| to_entry(cid, rec)))
            .collect()
    }
}

fn take_seq(next_seq: &mut i64) -> i64 {
    let seq = *next_seq;
    *next_seq += 1;
    seq
}

fn record_from(entry: &ChangeEntry, stamp: Stamp) -> ClockRecord {
    ClockRecord {
        val: entry.val.clone(),
        col_version: entry.col_version,
        db_version: stamp.db_version,
        site_id: entry.site_id,
        seq: stamp.seq,
    }
}

fn compare_clock(entry: &ChangeEntry, current: &ClockRecord) -> Ordering {
    entry
        .col_version
        .cmp(&current.col_version)
        .then_with(|| compare_values(&entry.val, &current.val))
        .then_with(|| entry.site_id.cmp(&current.site_id))
}

/// Total order over JSON values, following SQLite's storage-class order:
/// null, then numbers, then text, then everything else.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) | Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) | Value::Object(_) => 3,
        }
    }
    fn as_number(v: &Value) -> f64 {
        match v {
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    rank(a).cmp(&rank(b)).then_with(|| match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => {
            a.to_string().cmp(&b.to_string())
        }
        _ => as_number(a).total_cmp(&as_number(b)),
    })
}
