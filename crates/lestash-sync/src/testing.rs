//! Scriptable transports and stores for coordinator and session tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use lestash_protocol::{ChangesResponse, StatusResponse};
use lestash_store::{ChangeLogStore, InMemoryChangeLog, SearchHit, StoreError, StoreResult};
use lestash_types::{ChangeEntry, DbVersion, Peer, ProtocolDescriptor, SiteId};

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;

#[derive(Clone, Copy, Debug)]
pub enum Failure {
    StatusTimeout,
    ChangesTimeout,
    MalformedChanges,
}

/// One simulated peer, serving from an in-memory store.
pub struct FakeRemote {
    store: Arc<InMemoryChangeLog>,
    descriptor: Option<ProtocolDescriptor>,
    version: Option<DbVersion>,
    failure: Option<Failure>,
    tamper: Option<fn(&mut ChangesResponse)>,
    ignore_since: bool,
}

impl FakeRemote {
    pub fn new(store: Arc<InMemoryChangeLog>) -> Self {
        Self { store, descriptor: None, version: None, failure: None, tamper: None, ignore_since: false }
    }

    pub fn with_descriptor(mut self, descriptor: ProtocolDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Report this database version regardless of the store's.
    pub fn reporting_version(mut self, version: DbVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn tampering(mut self, tamper: fn(&mut ChangesResponse)) -> Self {
        self.tamper = Some(tamper);
        self
    }

    /// Serve the full log no matter what `since` is requested.
    pub fn ignoring_since(mut self) -> Self {
        self.ignore_since = true;
        self
    }

    fn url(peer: &Peer, path: &str) -> String {
        format!("{}{}", peer.base_url(), path)
    }
}

/// Transport that routes by peer name to [`FakeRemote`]s and counts calls.
#[derive(Default)]
pub struct FakeTransport {
    remotes: HashMap<String, FakeRemote>,
    pub status_calls: AtomicUsize,
    pub changes_calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(mut self, name: &str, remote: FakeRemote) -> Self {
        self.remotes.insert(name.to_string(), remote);
        self
    }

    fn remote(&self, peer: &Peer, path: &str) -> SyncResult<&FakeRemote> {
        self.remotes.get(&peer.name).ok_or_else(|| SyncError::ConnectionRefused {
            url: FakeRemote::url(peer, path),
        })
    }
}

#[async_trait]
impl SyncTransport for FakeTransport {
    async fn fetch_status(&self, peer: &Peer) -> SyncResult<StatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let remote = self.remote(peer, "/sync/status")?;
        if let Some(Failure::StatusTimeout) = remote.failure {
            return Err(SyncError::Timeout { url: FakeRemote::url(peer, "/sync/status") });
        }
        let descriptor = remote.descriptor.clone().unwrap_or_else(|| remote.store.descriptor());
        let version = match remote.version {
            Some(v) => v,
            None => remote.store.db_version()?,
        };
        Ok(StatusResponse::new(remote.store.site_id()?, version, &descriptor))
    }

    async fn fetch_changes(&self, peer: &Peer, since: DbVersion) -> SyncResult<ChangesResponse> {
        self.changes_calls.fetch_add(1, Ordering::SeqCst);
        let remote = self.remote(peer, "/sync/changes")?;
        match remote.failure {
            Some(Failure::ChangesTimeout) => {
                return Err(SyncError::Timeout { url: FakeRemote::url(peer, "/sync/changes") })
            }
            Some(Failure::MalformedChanges) => {
                return Err(SyncError::MalformedResponse {
                    url: FakeRemote::url(peer, "/sync/changes"),
                    reason: "missing field `changes`".into(),
                })
            }
            _ => {}
        }
        let since = if remote.ignore_since { 0 } else { since };
        let snapshot = remote.store.snapshot_since(since)?;
        let version = remote.version.unwrap_or(snapshot.db_version);
        let mut response = ChangesResponse::new(snapshot.site_id, version, since, snapshot.changes);
        if let Some(tamper) = remote.tamper {
            tamper(&mut response);
        }
        Ok(response)
    }
}

/// Store whose apply or index rebuild always fails.
pub struct FailingStore {
    inner: InMemoryChangeLog,
    fail_apply: bool,
    fail_index: bool,
}

impl FailingStore {
    pub fn failing_apply() -> Self {
        Self {
            inner: InMemoryChangeLog::with_site_id(SiteId::from_bytes([1; 16])),
            fail_apply: true,
            fail_index: false,
        }
    }

    pub fn failing_index() -> Self {
        Self {
            inner: InMemoryChangeLog::with_site_id(SiteId::from_bytes([1; 16])),
            fail_apply: false,
            fail_index: true,
        }
    }
}

impl ChangeLogStore for FailingStore {
    fn site_id(&self) -> StoreResult<SiteId> {
        self.inner.site_id()
    }

    fn db_version(&self) -> StoreResult<DbVersion> {
        self.inner.db_version()
    }

    fn changes_since(&self, since: DbVersion) -> StoreResult<Vec<ChangeEntry>> {
        self.inner.changes_since(since)
    }

    fn apply(&self, entries: &[ChangeEntry]) -> StoreResult<usize> {
        if self.fail_apply {
            return Err(StoreError::ApplyRejected("disk full".into()));
        }
        self.inner.apply(entries)
    }

    fn rebuild_index(&self) -> StoreResult<usize> {
        if self.fail_index {
            return Err(StoreError::Corrupt("index table missing".into()));
        }
        self.inner.rebuild_index()
    }

    fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>> {
        self.inner.search(query, limit)
    }

    fn table_change_counts(&self) -> StoreResult<BTreeMap<String, usize>> {
        self.inner.table_change_counts()
    }
}
