use shortlink_core::infrastructure::kv::{MemoryStore, RemoteStore};
use shortlink_core::infrastructure::lock::{DistributedMutex, LockError, LockOptions};
use std::sync::Arc;
use std::time::Duration;

const LEASE: Duration = Duration::from_secs(3);

fn mutex() -> (Arc<MemoryStore>, DistributedMutex) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), DistributedMutex::new(store))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_concurrent_acquire_wins() {
    let (_, mutex) = mutex();

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let mutex = mutex.clone();
            tokio::spawn(async move { mutex.acquire("lock:job", LockOptions::lease(LEASE)).await })
        })
        .collect();

    let mut winners = Vec::new();
    let mut holders = Vec::new();
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(handle) => winners.push(handle),
            Err(LockError::AlreadyLocked { holder, .. }) => holders.push(holder),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(holders.len(), 15);
    let token = winners[0].token().to_string();
    assert!(holders.iter().all(|holder| *holder == token));
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_extends_lease_until_release() {
    let (store, mutex) = mutex();
    let handle = mutex
        .acquire("lock:long", LockOptions::lease(LEASE).with_watchdog())
        .await
        .unwrap();

    for _ in 0..5 {
        tokio::time::sleep(LEASE).await;
        assert_eq!(
            store.get("lock:long").await.unwrap().as_deref(),
            Some(handle.token())
        );
    }

    handle.release().await.unwrap();
    assert!(store.get("lock:long").await.unwrap().is_none());
    assert!(
        mutex
            .acquire("lock:long", LockOptions::lease(LEASE))
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_release_does_not_remove_foreign_lock() {
    let (store, mutex) = mutex();
    let handle = mutex
        .acquire("lock:shared", LockOptions::lease(LEASE))
        .await
        .unwrap();

    // Simulate the lease expiring and another owner taking over.
    store.del("lock:shared").await.unwrap();
    store
        .set("lock:shared", "someone-else", Some(LEASE))
        .await
        .unwrap();

    let _ = handle.release().await;

    assert_eq!(
        store.get("lock:shared").await.unwrap().as_deref(),
        Some("someone-else")
    );
}
