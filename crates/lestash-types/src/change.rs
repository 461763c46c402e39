use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::site::SiteId;

/// Logical database version: the replication watermark.
pub type DbVersion = i64;

/// Column id the merge engine uses for row-level sentinel entries
/// (row creation and deletion carry no column value).
pub const SENTINEL_CID: &str = "-1";

/// One causal change log record.
///
/// Field names match the wire format. `pk` is the merge engine's packed
/// primary key, hex-encoded. `cl` is the row's causal length: odd while the
/// row is live, even once it has been deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub table: String,
    pub pk: String,
    pub cid: String,
    #[serde(default)]
    pub val: serde_json::Value,
    pub col_version: i64,
    pub db_version: DbVersion,
    #[serde(default)]
    pub site_id: Option<SiteId>,
    pub cl: i64,
    pub seq: i64,
}

impl ChangeEntry {
    /// Ordering key used by the remote when serving the log.
    pub fn order_key(&self) -> (DbVersion, i64) {
        (self.db_version, self.seq)
    }

    pub fn is_sentinel(&self) -> bool {
        self.cid == SENTINEL_CID
    }

    /// Whether this entry records the row as deleted.
    pub fn is_tombstone(&self) -> bool {
        self.cl % 2 == 0
    }

    /// Why this entry cannot be merged, if it cannot.
    pub fn malformed_reason(&self) -> Option<&'static str> {
        if self.table.trim().is_empty() {
            return Some("empty table name");
        }
        if self.pk.is_empty() {
            return Some("empty primary key");
        }
        if self.cid.is_empty() {
            return Some("empty column id");
        }
        if self.cl < 1 {
            return Some("causal length must be positive");
        }
        if self.col_version < 0 || self.db_version < 0 || self.seq < 0 {
            return Some("negative version or sequence");
        }
        None
    }
}

/// Compare two entries by `(db_version, seq)`.
pub fn causal_order(a: &ChangeEntry, b: &ChangeEntry) -> Ordering {
    a.order_key().cmp(&b.order_key())
}

/// Returns `true` if `entries` are in non-decreasing `(db_version, seq)` order.
pub fn is_causally_ordered(entries: &[ChangeEntry]) -> bool {
    entries
        .windows(2)
        .all(|w| causal_order(&w[0], &w[1]) != Ordering::Greater)
}
