//! Offline file bundles.
//!
//! An export is a change log read written to disk in the same JSON shape as a
//! `/sync/changes` response, so a device without network reach can be synced
//! by carrying a file. Importing applies the bundle like a pull would, but
//! never touches the peer registry.

use std::fs;
use std::path::Path;

use serde::Serialize;

use lestash_protocol::ChangesResponse;
use lestash_store::ChangeLogStore;
use lestash_types::{DbVersion, SiteId, CHANGESET_FORMAT};

use crate::coordinator::fill_origin;
use crate::error::{SyncError, SyncResult};

/// What an export wrote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub site_id: SiteId,
    pub db_version: DbVersion,
    pub since_version: DbVersion,
    pub change_count: usize,
}

/// What an import did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub source_site_id: Option<SiteId>,
    pub source_db_version: Option<DbVersion>,
    pub changes_received: usize,
    pub changes_applied: usize,
    /// Rows re-indexed, when the index was rebuilt.
    pub indexed: Option<usize>,
}

/// Read the local change log since `since` as a bundle.
pub fn export_bundle(store: &dyn ChangeLogStore, since: DbVersion) -> SyncResult<ChangesResponse> {
    let snapshot = store.snapshot_since(since)?;
    Ok(ChangesResponse::new(snapshot.site_id, snapshot.db_version, since, snapshot.changes))
}

/// Export changes since `since` to `path`.
pub fn write_bundle(store: &dyn ChangeLogStore, path: &Path, since: DbVersion) -> SyncResult<ExportSummary> {
    let bundle = export_bundle(store, since)?;
    let text = bundle.to_json_pretty().map_err(|e| SyncError::Bundle(e.to_string()))?;
    fs::write(path, text)?;
    let summary = ExportSummary {
        site_id: store.site_id()?,
        db_version: bundle.db_version.unwrap_or_default(),
        since_version: since,
        change_count: bundle.changes.len(),
    };
    tracing::info!(path = %path.display(), changes = summary.change_count, "exported change bundle");
    Ok(summary)
}

/// Apply an in-memory bundle.
///
/// The bundle must declare the changeset format this build speaks. When
/// `rebuild_index` is set and anything was applied, the text index is
/// rebuilt afterwards.
pub fn apply_bundle(
    store: &dyn ChangeLogStore,
    bundle: &ChangesResponse,
    rebuild_index: bool,
) -> SyncResult<ImportSummary> {
    match bundle.format.as_deref() {
        Some(CHANGESET_FORMAT) => {}
        Some(other) => return Err(SyncError::Bundle(format!("unknown export format: {other}"))),
        None => return Err(SyncError::Bundle("missing export format".into())),
    }
    bundle.validate().map_err(|e| SyncError::Bundle(e.to_string()))?;
    if bundle.site_id.is_some() && bundle.site_id == Some(store.site_id()?) {
        tracing::warn!("importing a bundle exported by this store");
    }

    let mut changes = bundle.changes.clone();
    if let Some(origin) = bundle.site_id {
        fill_origin(&mut changes, origin);
    }
    let applied = store.apply(&changes)?;
    let indexed = if rebuild_index && applied > 0 {
        Some(store.rebuild_index()?)
    } else {
        None
    };
    Ok(ImportSummary {
        source_site_id: bundle.site_id,
        source_db_version: bundle.db_version,
        changes_received: bundle.changes.len(),
        changes_applied: applied,
        indexed,
    })
}

/// Import a bundle file written by [`write_bundle`].
pub fn import_bundle(store: &dyn ChangeLogStore, path: &Path, rebuild_index: bool) -> SyncResult<ImportSummary> {
    let text = fs::read_to_string(path)?;
    let bundle = ChangesResponse::from_json(&text).map_err(|e| SyncError::Bundle(e.to_string()))?;
    let summary = apply_bundle(store, &bundle, rebuild_index)?;
    tracing::info!(
        path = %path.display(),
        received = summary.changes_received,
        applied = summary.changes_applied,
        "imported change bundle"
    );
    Ok(summary)
}
