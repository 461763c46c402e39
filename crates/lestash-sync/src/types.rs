use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lestash_types::{DbVersion, PeerId, SiteId};

use crate::error::ErrorKind;

/// Where a coordinator run currently is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Negotiating,
    Fetching,
    Applying,
    Indexing,
    Recording,
    Done { success: bool },
}

impl SyncPhase {
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Done { .. })
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Negotiating => write!(f, "negotiating"),
            Self::Fetching => write!(f, "fetching"),
            Self::Applying => write!(f, "applying"),
            Self::Indexing => write!(f, "indexing"),
            Self::Recording => write!(f, "recording"),
            Self::Done { success: true } => write!(f, "done"),
            Self::Done { success: false } => write!(f, "failed"),
        }
    }
}

/// Result of one coordinator run against one peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub peer_id: PeerId,
    pub peer_name: String,
    pub success: bool,
    /// `Done` for a successful run, otherwise the phase that failed.
    pub reached: SyncPhase,
    pub changes_received: usize,
    pub changes_applied: usize,
    pub remote_site_id: Option<SiteId>,
    pub remote_version: Option<DbVersion>,
    /// Watermark before the run.
    pub since_version: DbVersion,
    /// Watermark recorded by the run, if it got that far.
    pub recorded_version: Option<DbVersion>,
    pub index_rebuilt: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncOutcome {
    /// One-line human summary.
    pub fn summary(&self) -> String {
        match &self.error {
            None if self.changes_received == 0 => format!("{}: up to date", self.peer_name),
            None => format!(
                "{}: applied {} of {} changes",
                self.peer_name, self.changes_applied, self.changes_received
            ),
            Some(error) => format!("{}: failed while {}: {}", self.peer_name, self.reached, error),
        }
    }
}
