//! One pull replication run against one peer.
//!
//! `Idle -> Negotiating -> Fetching -> Applying -> Indexing -> Recording -> Done`
//!
//! Applying and Indexing are skipped when there is nothing to merge. The
//! registry is written only in Recording, so a run that fails at any earlier
//! point leaves the peer's watermark exactly where it was and the next run
//! re-fetches from the same baseline.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::Instrument;

use lestash_registry::PeerRegistry;
use lestash_store::ChangeLogStore;
use lestash_types::{is_causally_ordered, ChangeEntry, DbVersion, Peer, ProtocolDescriptor, SiteId};

use crate::error::{SyncError, SyncResult};
use crate::negotiation::{Negotiation, ProtocolNegotiator};
use crate::transport::SyncTransport;
use crate::types::{SyncOutcome, SyncPhase};

#[derive(Default)]
struct Progress {
    reached: SyncPhase,
    since: DbVersion,
    received: usize,
    applied: usize,
    remote_site: Option<SiteId>,
    remote_version: Option<DbVersion>,
    recorded: Option<DbVersion>,
    index_rebuilt: bool,
    warnings: Vec<String>,
}

impl Progress {
    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }
}

/// Drives a single sync run. Never returns an error: every failure becomes a
/// failed [`SyncOutcome`].
pub struct ReplicationCoordinator {
    store: Arc<dyn ChangeLogStore>,
    registry: Arc<dyn PeerRegistry>,
    transport: Arc<dyn SyncTransport>,
    phase: watch::Sender<SyncPhase>,
}

impl ReplicationCoordinator {
    pub fn new(
        store: Arc<dyn ChangeLogStore>,
        registry: Arc<dyn PeerRegistry>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self { store, registry, transport, phase }
    }

    /// Watch phase transitions as they happen.
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    pub fn store(&self) -> &Arc<dyn ChangeLogStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<dyn PeerRegistry> {
        &self.registry
    }

    fn enter(&self, progress: &mut Progress, phase: SyncPhase) {
        progress.reached = phase;
        self.phase.send_replace(phase);
        tracing::debug!(%phase, "entered sync phase");
    }

    /// Run one sync against `peer`.
    ///
    /// The watermark is re-read from the registry, so a stale `peer` value
    /// never causes changes to be skipped.
    pub async fn run(&self, peer: &Peer) -> SyncOutcome {
        let started_at = Utc::now();
        let timer = Instant::now();
        let mut progress = Progress { since: peer.last_synced_version, ..Progress::default() };

        let span = tracing::info_span!("sync", peer = %peer.name, location = %peer.location());
        let result = self.drive(peer, &mut progress).instrument(span).await;

        let success = result.is_ok();
        self.phase.send_replace(SyncPhase::Done { success });
        if success {
            progress.reached = SyncPhase::Done { success };
        }
        let duration_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (error, error_kind) = match &result {
            Ok(()) => {
                tracing::info!(
                    peer = %peer.name,
                    since = progress.since,
                    received = progress.received,
                    applied = progress.applied,
                    recorded = ?progress.recorded,
                    duration_ms,
                    "sync finished"
                );
                (None, None)
            }
            Err(e) => {
                tracing::warn!(
                    peer = %peer.name,
                    phase = %progress.reached,
                    kind = ?e.kind(),
                    error = %e,
                    "sync failed"
                );
                (Some(e.to_string()), Some(e.kind()))
            }
        };

        SyncOutcome {
            peer_id: peer.id,
            peer_name: peer.name.clone(),
            success,
            reached: progress.reached,
            changes_received: progress.received,
            changes_applied: progress.applied,
            remote_site_id: progress.remote_site,
            remote_version: progress.remote_version,
            since_version: progress.since,
            recorded_version: progress.recorded,
            index_rebuilt: progress.index_rebuilt,
            warnings: progress.warnings,
            error,
            error_kind,
            started_at,
            duration_ms,
        }
    }

    async fn drive(&self, peer: &Peer, p: &mut Progress) -> SyncResult<()> {
        let peer = self.registry.get(peer.id)?.ok_or(SyncError::PeerNotFound(peer.id))?;
        let since = peer.last_synced_version;
        p.since = since;

        // Negotiating
        self.enter(p, SyncPhase::Negotiating);
        let status = self.transport.fetch_status(&peer).await?;
        p.remote_site = Some(status.site_id);
        let local = self.store.descriptor();
        match ProtocolNegotiator::negotiate(&local, &status.protocol.to_descriptor()) {
            Negotiation::Incompatible { reason } => return Err(SyncError::Incompatible(reason)),
            Negotiation::Compatible { warnings } => {
                for w in warnings {
                    p.warn(w);
                }
            }
        }
        if let Some(recorded) = peer.site_id {
            if recorded != status.site_id {
                return Err(SyncError::SiteMismatch {
                    peer: peer.name.clone(),
                    recorded,
                    reported: status.site_id,
                });
            }
        }
        if status.site_id == self.store.site_id()? {
            return Err(SyncError::Incompatible(format!(
                "peer reports this store's own site id {}",
                status.site_id.short_hex()
            )));
        }

        // Fetching
        self.enter(p, SyncPhase::Fetching);
        let response = self.transport.fetch_changes(&peer, since).await?;
        if let Some(site) = response.site_id {
            if site != status.site_id {
                return Err(SyncError::MalformedResponse {
                    url: peer.base_url(),
                    reason: format!("changes came from site {site}, status reported {}", status.site_id),
                });
            }
        }
        let remote_version = response.db_version.unwrap_or(status.db_version);
        p.remote_version = Some(remote_version);
        p.received = response.changes.len();
        tracing::debug!(since, received = p.received, remote_version, "fetched changes");

        if remote_version < since {
            p.warn(format!(
                "remote database version {remote_version} is behind the recorded watermark {since}"
            ));
        }
        if !is_causally_ordered(&response.changes) {
            p.warn("changes were not delivered in causal order; applying in delivery order".to_string());
        }
        let stale = response.changes.iter().filter(|c| c.db_version <= since).count();
        if stale > 0 {
            p.warn(format!("{stale} changes are at or below the requested version {since}"));
        }
        let (entries, ignored) = prepare(response.changes, status.site_id, &local);
        if ignored > 0 {
            p.warn(format!("ignored {ignored} changes for tables not replicated locally"));
        }

        if entries.is_empty() {
            tracing::debug!("nothing to apply");
        } else {
            // Applying
            self.enter(p, SyncPhase::Applying);
            p.applied = self.store.apply(&entries)?;
            tracing::debug!(applied = p.applied, received = p.received, "applied changes");

            // Indexing
            if p.applied > 0 {
                self.enter(p, SyncPhase::Indexing);
                let indexed = self.store.rebuild_index()?;
                p.index_rebuilt = true;
                tracing::debug!(indexed, "rebuilt text index");
            }
        }

        // Recording
        self.enter(p, SyncPhase::Recording);
        let updated = self
            .registry
            .update_sync_status(peer.id, status.site_id, remote_version, Utc::now())?;
        p.recorded = Some(updated.last_synced_version);
        Ok(())
    }
}

/// Fill in missing origin sites and drop tables the local store does not
/// replicate. Delivery order is preserved.
fn prepare(
    changes: Vec<ChangeEntry>,
    remote_site: SiteId,
    local: &ProtocolDescriptor,
) -> (Vec<ChangeEntry>, usize) {
    let total = changes.len();
    let mut kept: Vec<ChangeEntry> = changes
        .into_iter()
        .filter(|c| local.replicates(&c.table))
        .collect();
    fill_origin(&mut kept, remote_site);
    let ignored = total - kept.len();
    (kept, ignored)
}

/// Attribute entries that arrived without an origin site to `origin`, the
/// site that served them.
pub(crate) fn fill_origin(changes: &mut [ChangeEntry], origin: SiteId) {
    for change in changes {
        change.site_id.get_or_insert(origin);
    }
}
