//! Two stores talking over real HTTP on loopback.

use std::sync::Arc;

use serde_json::json;
use tokio::net::TcpListener;

use lestash_registry::{PeerRegistry, SqlitePeerRegistry};
use lestash_server::{ServerConfig, SyncServer};
use lestash_store::{ChangeLogStore, InMemoryChangeLog, SqliteChangeLog};
use lestash_sync::{
    ErrorKind, HttpTransport, ReplicationCoordinator, SyncPhase, SyncSessionManager, TransportConfig,
};
use lestash_types::{NewPeer, SiteId};

async fn spawn_remote(store: Arc<InMemoryChangeLog>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = SyncServer::new(ServerConfig::default(), store);
    tokio::spawn(server.serve_on(listener));
    port
}

fn transport() -> Arc<HttpTransport> {
    let config = TransportConfig { connect_timeout_secs: 2, response_timeout_secs: 5 };
    Arc::new(HttpTransport::new(&config).unwrap())
}

#[tokio::test]
async fn pull_over_http_and_record_watermark() {
    let remote = Arc::new(InMemoryChangeLog::with_site_id(SiteId::from_bytes([0x22; 16])));
    remote
        .insert_row("items", "01", &[("title", json!("Sourdough starter")), ("author", json!("kim"))])
        .unwrap();
    remote.insert_row("items", "02", &[("title", json!("Pickles"))]).unwrap();
    let port = spawn_remote(remote.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("stash.db");
    let local = Arc::new(SqliteChangeLog::open(&db).unwrap());
    let registry = Arc::new(SqlitePeerRegistry::open(&db).unwrap());
    let peer = registry.add(&NewPeer::new("laptop", "127.0.0.1", port)).unwrap();

    let coordinator = ReplicationCoordinator::new(local.clone(), registry.clone(), transport());
    let outcome = coordinator.run(&peer).await;
    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.reached, SyncPhase::Done { success: true });
    assert_eq!(outcome.changes_received, 5);
    assert_eq!(outcome.changes_applied, 5);
    assert_eq!(outcome.remote_site_id, Some(SiteId::from_bytes([0x22; 16])));
    assert_eq!(outcome.recorded_version, Some(2));
    assert!(outcome.index_rebuilt);

    let stored = registry.require(peer.id).unwrap();
    assert_eq!(stored.last_synced_version, 2);
    assert_eq!(stored.site_id, Some(SiteId::from_bytes([0x22; 16])));
    assert!(stored.last_synced_at.is_some());

    let row = local.row("items", "01").unwrap().unwrap();
    assert_eq!(row["title"], json!("Sourdough starter"));
    assert_eq!(local.search("sourdough", 10).unwrap().len(), 1);

    // Only the new change crosses the wire on the next pull.
    remote.insert_row("items", "03", &[("title", json!("Kimchi"))]).unwrap();
    let peer = registry.require(peer.id).unwrap();
    let second = coordinator.run(&peer).await;
    assert!(second.success);
    assert_eq!(second.since_version, 2);
    assert_eq!(second.changes_received, 2);
    assert_eq!(registry.require(peer.id).unwrap().last_synced_version, 3);
}

#[tokio::test]
async fn session_reports_unreachable_peer_and_continues() {
    let remote = Arc::new(InMemoryChangeLog::with_site_id(SiteId::from_bytes([0x33; 16])));
    remote.insert_row("items", "0a", &[("title", json!("Reachable"))]).unwrap();
    let port = spawn_remote(remote).await;

    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let registry = Arc::new(SqlitePeerRegistry::open_in_memory().unwrap());
    let gone = registry.add(&NewPeer::new("gone", "127.0.0.1", closed)).unwrap();
    let here = registry.add(&NewPeer::new("here", "127.0.0.1", port)).unwrap();
    let local = Arc::new(InMemoryChangeLog::with_site_id(SiteId::from_bytes([1; 16])));

    let manager = SyncSessionManager::new(ReplicationCoordinator::new(
        local.clone(),
        registry.clone(),
        transport(),
    ));
    let outcomes = manager.sync_all().await.unwrap();
    assert_eq!(outcomes.len(), 2);

    assert!(!outcomes[0].success);
    assert_eq!(outcomes[0].error_kind, Some(ErrorKind::Connectivity));
    assert_eq!(registry.require(gone.id).unwrap().last_synced_version, 0);

    assert!(outcomes[1].success);
    assert_eq!(registry.require(here.id).unwrap().last_synced_version, 1);
    assert_eq!(local.db_version().unwrap(), 1);
    assert!(!manager.status().in_progress);
}
