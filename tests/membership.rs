//! End-to-end membership tracking over the in-process store

use miniroute::common::fnv1a_32;
use miniroute::discovery::{AddrBackendFactory, BackendFactory};
use miniroute::{CoordinationClient, Error, MembershipMonitor, MemoryStore, SelfRegistrar};
use std::sync::Arc;
use std::time::Duration;

const RETRY: Duration = Duration::from_millis(20);

fn client(store: &MemoryStore) -> CoordinationClient {
    CoordinationClient::new(
        vec!["memory".to_string()],
        Duration::from_secs(5),
        Arc::new(store.clone()),
    )
}

fn monitor(store: &MemoryStore, path: &str) -> MembershipMonitor<AddrBackendFactory> {
    MembershipMonitor::new(client(store), path, AddrBackendFactory, serde_json::Value::Null)
        .unwrap()
        .with_watch_retry(RETRY)
}

async fn wait_for_addrs<F: BackendFactory>(monitor: &MembershipMonitor<F>, expected: &[&str]) {
    let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    expected.sort();
    let converged = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let mut addrs = monitor.snapshot().addrs();
            addrs.sort();
            if addrs == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(
        converged.is_ok(),
        "expected {:?}, got {:?}",
        expected,
        monitor.snapshot().addrs()
    );
}

#[tokio::test]
async fn test_registered_addresses_become_routable() {
    let store = MemoryStore::new();
    let registrar = SelfRegistrar::new(client(&store), "/redis").unwrap();
    registrar.register("10.0.0.1:6379").await.unwrap();
    registrar.register("10.0.0.2:6379").await.unwrap();

    let monitor = monitor(&store, "/redis");
    monitor.run().await.unwrap();
    wait_for_addrs(&monitor, &["10.0.0.1:6379", "10.0.0.2:6379"]).await;

    let router = monitor.round_robin();
    let first = router.get_connection().unwrap();
    let second = router.get_connection().unwrap();
    assert_ne!(first, second);
    assert_eq!(router.get_connection().unwrap(), first);

    let hash = monitor.hash_router(None);
    let snapshot = monitor.snapshot().addrs();
    let expected = &snapshot[fnv1a_32(b"user:42") as usize % snapshot.len()];
    assert_eq!(&hash.get_connection(b"user:42").unwrap(), expected);

    monitor.close().await;
    registrar.close().await;
}

#[tokio::test]
async fn test_departed_address_is_disabled_then_reenabled() {
    let store = MemoryStore::new();
    let stable = SelfRegistrar::new(client(&store), "/svc").unwrap();
    stable.register("a:1").await.unwrap();

    let monitor = monitor(&store, "/svc");
    monitor.run().await.unwrap();
    wait_for_addrs(&monitor, &["a:1"]).await;

    let flaky = SelfRegistrar::new(client(&store), "/svc").unwrap();
    flaky.register("b:1").await.unwrap();
    wait_for_addrs(&monitor, &["a:1", "b:1"]).await;

    flaky.close().await;
    wait_for_addrs(&monitor, &["a:1"]).await;
    let status = monitor.status();
    assert_eq!(status.handles.len(), 2);
    let b = status.handles.iter().find(|h| h.addr == "b:1").unwrap();
    assert!(!b.valid);
    assert_eq!(b.disable_count, 1);
    assert!(b.backend_status.starts_with("disabled"));

    let router = monitor.round_robin();
    for _ in 0..4 {
        assert_eq!(router.get_connection().unwrap(), "a:1");
    }

    let back = SelfRegistrar::new(client(&store), "/svc").unwrap();
    back.register("b:1").await.unwrap();
    wait_for_addrs(&monitor, &["a:1", "b:1"]).await;
    let status = monitor.status();
    assert_eq!(status.handles.len(), 2);
    let b = status.handles.iter().find(|h| h.addr == "b:1").unwrap();
    assert!(b.valid);
    assert_eq!(b.enable_count, 1);

    monitor.close().await;
    stable.close().await;
    back.close().await;
}

#[tokio::test]
async fn test_empty_directory_has_no_connection() {
    let store = MemoryStore::new();
    client(&store).create_persistent_node("/empty").await.unwrap();

    let monitor = monitor(&store, "/empty");
    monitor.run().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while monitor.status().addr_changes == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = monitor.round_robin().get_connection().unwrap_err();
    assert!(matches!(err, Error::NoAddressAvailable));
    assert_eq!(err.to_string(), "No connection available");
    assert!(monitor.hash_router(None).get_connection(b"k").is_err());
    monitor.close().await;
}

#[tokio::test]
async fn test_session_expiry_converges_back() {
    let store = MemoryStore::new();
    let registrar = SelfRegistrar::new(client(&store), "/svc").unwrap();
    registrar.register("a:1").await.unwrap();
    registrar.register("b:1").await.unwrap();

    let monitor = monitor(&store, "/svc");
    monitor.run().await.unwrap();
    wait_for_addrs(&monitor, &["a:1", "b:1"]).await;

    store.expire_sessions();
    tokio::time::sleep(Duration::from_millis(50)).await;
    wait_for_addrs(&monitor, &["a:1", "b:1"]).await;
    assert_eq!(monitor.status().handles.len(), 2);

    monitor.close().await;
    registrar.close().await;
}

#[tokio::test]
async fn test_store_outage_keeps_last_snapshot() {
    let store = MemoryStore::new();
    let registrar = SelfRegistrar::new(client(&store), "/svc").unwrap();
    registrar.register("a:1").await.unwrap();

    let monitor = monitor(&store, "/svc");
    monitor.run().await.unwrap();
    wait_for_addrs(&monitor, &["a:1"]).await;

    store.set_available(false);
    tokio::time::sleep(RETRY * 3).await;
    // Routing keeps working on the last published snapshot
    assert_eq!(monitor.round_robin().get_connection().unwrap(), "a:1");

    store.set_available(true);
    registrar.register("b:1").await.unwrap();
    wait_for_addrs(&monitor, &["a:1", "b:1"]).await;

    monitor.close().await;
    registrar.close().await;
}

#[tokio::test]
async fn test_close_is_prompt_and_final() {
    let store = MemoryStore::new();
    let registrar = SelfRegistrar::new(client(&store), "/svc").unwrap();
    registrar.register("a:1").await.unwrap();

    let monitor = monitor(&store, "/svc");
    monitor.run().await.unwrap();
    wait_for_addrs(&monitor, &["a:1"]).await;
    let handles = monitor.snapshot();

    tokio::time::timeout(Duration::from_secs(5), monitor.close())
        .await
        .expect("close did not return");
    assert!(monitor.snapshot().is_empty());
    assert!(handles.handles().iter().all(|h| h.client().is_closed()));

    registrar.register("b:1").await.unwrap();
    tokio::time::sleep(RETRY * 3).await;
    assert!(monitor.snapshot().is_empty());
    assert!(matches!(
        monitor.round_robin().get_connection(),
        Err(Error::NoAddressAvailable)
    ));
    registrar.close().await;
}
