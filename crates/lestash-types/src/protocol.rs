use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Sync protocol version. Peers must match exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Changeset format identifier. Peers must match exactly.
pub const CHANGESET_FORMAT: &str = "lestash-crsqlite-v1";

/// Local relational schema version. A mismatch only produces a warning.
pub const SCHEMA_VERSION: u32 = 3;

/// Version of the causal-log merge engine the store is built against.
pub const MERGE_ENGINE_VERSION: &str = "0.16.3";

/// Tables replicated between peers.
///
/// The text index, item history, and local logs are derived or device-local
/// and never leave the store.
pub const SYNC_TABLES: [&str; 5] = ["items", "tags", "item_tags", "sources", "person_profiles"];

/// Describes one store's sync capability.
///
/// Recomputed on every status request and never cached beyond a single
/// negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    pub protocol_version: u32,
    pub changeset_format: String,
    pub schema_version: u32,
    pub merge_engine_version: String,
    pub replicated_tables: BTreeSet<String>,
}

impl ProtocolDescriptor {
    /// The descriptor this build of the store speaks.
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            changeset_format: CHANGESET_FORMAT.to_string(),
            schema_version: SCHEMA_VERSION,
            merge_engine_version: MERGE_ENGINE_VERSION.to_string(),
            replicated_tables: SYNC_TABLES.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn replicates(&self, table: &str) -> bool {
        self.replicated_tables.contains(table)
    }

    /// Leading numeric component of the merge engine version.
    ///
    /// `"0.16.3"` yields `Some(0)`, `"v2.1"` yields `Some(2)`. Returns `None`
    /// when the version does not start with a number.
    pub fn merge_engine_major(&self) -> Option<u64> {
        leading_component(&self.merge_engine_version)
    }
}

impl Default for ProtocolDescriptor {
    fn default() -> Self {
        Self::current()
    }
}

fn leading_component(version: &str) -> Option<u64> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}
