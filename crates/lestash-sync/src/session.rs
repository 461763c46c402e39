use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use lestash_types::{Peer, PeerId};

use crate::coordinator::ReplicationCoordinator;
use crate::error::{SyncError, SyncResult};
use crate::types::{SyncOutcome, SyncPhase};

/// Snapshot of a session manager for callers polling progress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub in_progress: bool,
    pub current_peer: Option<String>,
    pub phase: SyncPhase,
    pub last_outcome: Option<SyncOutcome>,
}

/// Runs the coordinator over peers one at a time.
///
/// At most one session runs per manager; a second request while one is in
/// flight is rejected with [`SyncError::SessionInProgress`]. A failure
/// against one peer never stops the remaining peers.
pub struct SyncSessionManager {
    coordinator: ReplicationCoordinator,
    running: AtomicBool,
    current_peer: Mutex<Option<String>>,
    last_outcome: Mutex<Option<SyncOutcome>>,
}

struct RunGuard<'a> {
    manager: &'a SyncSessionManager,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.manager.current_peer) = None;
        self.manager.running.store(false, Ordering::Release);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncSessionManager {
    pub fn new(coordinator: ReplicationCoordinator) -> Self {
        Self {
            coordinator,
            running: AtomicBool::new(false),
            current_peer: Mutex::new(None),
            last_outcome: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &ReplicationCoordinator {
        &self.coordinator
    }

    fn begin(&self) -> SyncResult<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::SessionInProgress)?;
        Ok(RunGuard { manager: self })
    }

    /// Sync every registered peer, in id order.
    pub async fn sync_all(&self) -> SyncResult<Vec<SyncOutcome>> {
        let _guard = self.begin()?;
        let peers = self.coordinator.registry().list()?;
        tracing::info!(peers = peers.len(), "starting sync session");
        Ok(self.run_sequence(&peers).await)
    }

    /// Sync the given peers, in order.
    pub async fn sync_peers(&self, peers: &[Peer]) -> SyncResult<Vec<SyncOutcome>> {
        let _guard = self.begin()?;
        tracing::info!(peers = peers.len(), "starting sync session");
        Ok(self.run_sequence(peers).await)
    }

    /// Sync a single registered peer.
    pub async fn sync_with_peer(&self, id: PeerId) -> SyncResult<SyncOutcome> {
        let _guard = self.begin()?;
        let peer = self
            .coordinator
            .registry()
            .get(id)?
            .ok_or(SyncError::PeerNotFound(id))?;
        Ok(self.run_one(&peer).await)
    }

    async fn run_sequence(&self, peers: &[Peer]) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::with_capacity(peers.len());
        for peer in peers {
            outcomes.push(self.run_one(peer).await);
        }
        let failed = outcomes.iter().filter(|o| !o.success).count();
        tracing::info!(peers = outcomes.len(), failed, "sync session finished");
        outcomes
    }

    async fn run_one(&self, peer: &Peer) -> SyncOutcome {
        *lock(&self.current_peer) = Some(peer.name.clone());
        let outcome = self.coordinator.run(peer).await;
        *lock(&self.last_outcome) = Some(outcome.clone());
        outcome
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_outcome(&self) -> Option<SyncOutcome> {
        lock(&self.last_outcome).clone()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            in_progress: self.is_running(),
            current_peer: lock(&self.current_peer).clone(),
            phase: self.coordinator.phase(),
            last_outcome: self.last_outcome(),
        }
    }
}
