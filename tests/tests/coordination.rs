use apis::{Api, Lease, LeaseSpec, MemoryStore, ObjectMeta, RecordStore};
use chrono::{Duration as ChronoDuration, Utc};
use coordination::{run_worker, ElectionState, LeaderElector, LeaseConfig, QueueConfig, TaskQueue};
use local_storage_tests::{eventually, fast_queue};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_backoff_doubles_and_caps() {
    let config = QueueConfig::default();
    assert_eq!(config.backoff(0), Duration::from_millis(1000));
    assert_eq!(config.backoff(1), Duration::from_millis(2000));
    assert_eq!(config.backoff(4), Duration::from_millis(16_000));
    assert_eq!(config.backoff(10), Duration::from_millis(60_000));
    assert_eq!(config.backoff(u32::MAX), Duration::from_millis(60_000));
    assert_eq!(config.with_max_retries(3).max_retries, 3);
}

#[tokio::test]
async fn test_queue_deduplicates_pending_items() {
    let queue = TaskQueue::<String>::new("test", fast_queue());
    queue.add("a".to_string());
    queue.add("a".to_string());
    queue.add("b".to_string());
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.get().await.as_deref(), Some("a"));
    assert_eq!(queue.get().await.as_deref(), Some("b"));
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_item_added_while_processing_comes_back_after_done() {
    let queue = TaskQueue::<String>::new("test", fast_queue());
    queue.add("a".to_string());
    let item = queue.get().await.unwrap();

    queue.add("a".to_string());
    assert!(queue.is_empty(), "in-flight items are not queued twice");

    queue.done(&item);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.get().await.as_deref(), Some("a"));
}

#[tokio::test]
async fn test_shutdown_wakes_waiters() {
    let queue = TaskQueue::<String>::new("test", fast_queue());
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.get().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    queue.shutdown();
    assert!(queue.is_shutting_down());
    assert_eq!(waiter.await.unwrap(), None);

    queue.add("late".to_string());
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_rate_limited_items_are_dropped_after_max_retries() {
    let queue = TaskQueue::<String>::new("test", fast_queue().with_max_retries(2));
    queue.add_rate_limited("a".to_string());
    queue.add_rate_limited("a".to_string());
    assert_eq!(queue.num_requeues(&"a".to_string()), 2);

    queue.add_rate_limited("a".to_string());
    assert_eq!(queue.num_requeues(&"a".to_string()), 0);
}

#[tokio::test]
async fn test_worker_retries_failures_then_forgets() {
    let queue = TaskQueue::<String>::new("test", fast_queue());
    let attempts = Arc::new(AtomicU32::new(0));

    let worker = {
        let queue = queue.clone();
        let attempts = attempts.clone();
        tokio::spawn(run_worker(queue, move |_task: String| {
            let attempts = attempts.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("not yet")
                } else {
                    Ok(())
                }
            }
        }))
    };

    queue.add("a".to_string());
    eventually("three attempts", || {
        let attempts = attempts.clone();
        async move { attempts.load(Ordering::SeqCst) >= 3 }
    })
    .await;
    eventually("failure history cleared", || {
        let queue = queue.clone();
        async move { queue.num_requeues(&"a".to_string()) == 0 }
    })
    .await;

    queue.shutdown();
    worker.await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

fn lease_config(identity: &str) -> LeaseConfig {
    let mut config = LeaseConfig::new("controller", "system", identity);
    config.lease_duration_ms = 1_000;
    config.renew_deadline_ms = 500;
    config.retry_period_ms = 50;
    config
}

#[tokio::test]
async fn test_first_candidate_acquires_and_second_follows() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let first = LeaderElector::new(store.clone(), lease_config("node-1"));
    let second = LeaderElector::new(store.clone(), lease_config("node-2"));

    assert!(first.try_acquire_or_renew().await.unwrap());
    assert!(!second.try_acquire_or_renew().await.unwrap());
    assert_eq!(second.current_leader().await.as_deref(), Some("node-1"));

    // renewal by the holder keeps the lease
    assert!(first.try_acquire_or_renew().await.unwrap());

    let leases: Api<Lease> = Api::namespaced(store, "system");
    let lease = leases.get("controller").await.unwrap();
    assert_eq!(lease.spec.holder_identity, "node-1");
    assert_eq!(lease.spec.lease_duration_seconds, 1);
    assert_eq!(lease.spec.lease_transitions, 0);
}

#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let leases: Api<Lease> = Api::namespaced(store.clone(), "system");
    let stale = Utc::now() - ChronoDuration::seconds(60);
    leases
        .create(&Lease {
            metadata: ObjectMeta::namespaced("system", "controller"),
            spec: LeaseSpec {
                holder_identity: "node-gone".to_string(),
                lease_duration_seconds: 15,
                acquire_time: Some(stale),
                renew_time: Some(stale),
                lease_transitions: 3,
            },
        })
        .await
        .unwrap();

    let elector = LeaderElector::new(store, lease_config("node-2"));
    assert!(elector.try_acquire_or_renew().await.unwrap());

    let lease = leases.get("controller").await.unwrap();
    assert_eq!(lease.spec.holder_identity, "node-2");
    assert_eq!(lease.spec.lease_transitions, 4);
}

#[tokio::test]
async fn test_release_lets_another_candidate_lead() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let first = Arc::new(LeaderElector::new(store.clone(), lease_config("node-1")));
    let second = LeaderElector::new(store.clone(), lease_config("node-2"));
    assert_eq!(first.state().await, ElectionState::Follower);

    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let leader = {
        let first = first.clone();
        tokio::spawn(async move {
            first
                .run_with_lease(async move {
                    let _ = started_tx.send(());
                    tokio::time::sleep(Duration::from_millis(100)).await;
                })
                .await
        })
    };

    started_rx.await.unwrap();
    assert!(first.is_leader().await);
    assert_eq!(first.identity(), "node-1");
    leader.await.unwrap().unwrap();

    first.release().await.unwrap();
    assert_eq!(first.state().await, ElectionState::Follower);
    assert!(second.try_acquire_or_renew().await.unwrap());
}
