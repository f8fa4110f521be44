//! Shared backend lifecycle: single launch, retry after failure, idle
//! reclamation, and disconnect handling.

mod support;

use futures::future::join_all;
use mmdr_core::Error;
use mmdr_render::{RenderConfig, RenderMetrics, ResourceManager};
use std::sync::Arc;
use std::time::Duration;
use support::ScriptedBackend;
use tokio::sync::watch;

fn manager(backend: &ScriptedBackend, idle_max: Duration) -> Arc<ResourceManager> {
    Arc::new(ResourceManager::new(
        Arc::new(backend.clone()),
        RenderConfig::default().with_idle_max(idle_max),
        RenderMetrics::new(),
    ))
}

#[tokio::test]
async fn test_concurrent_acquire_launches_once() {
    let backend = ScriptedBackend::new().with_launch_delay(Duration::from_millis(50));
    let manager = manager(&backend, Duration::from_secs(300));

    let leases = join_all((0..16).map(|_| manager.acquire())).await;
    let leases: Vec<_> = leases.into_iter().map(|lease| lease.unwrap()).collect();

    assert_eq!(backend.state.launches(), 1);
    let id = leases[0].instance_id();
    assert!(leases.iter().all(|lease| lease.instance_id() == id));
    assert_eq!(leases.iter().filter(|lease| lease.freshly_created()).count(), 1);
    assert_eq!(manager.status().in_flight, 16);

    drop(leases);
    assert_eq!(manager.status().in_flight, 0);
}

#[tokio::test]
async fn test_launch_failure_reaches_all_waiters_and_allows_retry() {
    let backend = ScriptedBackend::new().with_launch_delay(Duration::from_millis(20));
    backend.fail_next_launches(1);
    let manager = manager(&backend, Duration::from_secs(300));

    let results = join_all((0..4).map(|_| manager.acquire())).await;
    for result in &results {
        assert!(matches!(result, Err(Error::BackendLaunch(msg)) if msg.contains("browser binary not found")));
    }
    assert_eq!(backend.state.launches(), 1);
    assert_eq!(manager.status().state, "idle");

    let lease = manager.acquire().await.unwrap();
    assert!(lease.freshly_created());
    assert_eq!(backend.state.launches(), 2);
    assert_eq!(manager.metrics().snapshot().launch_failures, 1);
}

#[tokio::test]
async fn test_ready_instance_is_reused() {
    let backend = ScriptedBackend::new();
    let manager = manager(&backend, Duration::from_secs(300));

    let first = manager.acquire().await.unwrap();
    let first_id = first.instance_id();
    drop(first);

    let second = manager.acquire().await.unwrap();
    assert_eq!(second.instance_id(), first_id);
    assert!(!second.freshly_created());
    assert_eq!(backend.state.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_instance_is_reclaimed_and_relaunched() {
    let backend = ScriptedBackend::new();
    let manager = manager(&backend, Duration::from_secs(10));

    let lease = manager.acquire().await.unwrap();
    lease.mark_used();
    drop(lease);

    assert!(!manager.reap_idle().await);

    tokio::time::advance(Duration::from_secs(11)).await;
    assert!(manager.reap_idle().await);
    assert_eq!(backend.state.closes(), 1);
    assert_eq!(manager.status().state, "idle");
    assert_eq!(manager.metrics().snapshot().idle_reclaims, 1);

    let lease = manager.acquire().await.unwrap();
    assert!(lease.freshly_created());
    assert_eq!(backend.state.launches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_mark_used_postpones_reclamation() {
    let backend = ScriptedBackend::new();
    let manager = manager(&backend, Duration::from_secs(10));

    let lease = manager.acquire().await.unwrap();
    tokio::time::advance(Duration::from_secs(8)).await;
    lease.mark_used();
    drop(lease);

    tokio::time::advance(Duration::from_secs(8)).await;
    assert!(!manager.reap_idle().await);

    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(manager.reap_idle().await);
}

#[tokio::test(start_paused = true)]
async fn test_outstanding_lease_blocks_reclamation() {
    let backend = ScriptedBackend::new();
    let manager = manager(&backend, Duration::from_secs(10));

    let lease = manager.acquire().await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;

    assert!(!manager.reap_idle().await);
    assert_eq!(backend.state.closes(), 0);

    drop(lease);
    assert!(manager.reap_idle().await);
    assert_eq!(backend.state.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reaper_task_reclaims_and_stops() {
    let backend = ScriptedBackend::new();
    let manager = manager(&backend, Duration::from_secs(5));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reaper = manager.spawn_idle_reaper(shutdown_rx).unwrap();
    drop(manager.acquire().await.unwrap());

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(backend.state.closes(), 1);

    shutdown_tx.send(true).unwrap();
    reaper.await.unwrap();
}

#[tokio::test]
async fn test_reaper_disabled_without_idle_window() {
    let backend = ScriptedBackend::new();
    let manager = manager(&backend, Duration::ZERO);
    let (_tx, rx) = watch::channel(false);

    assert!(manager.spawn_idle_reaper(rx).is_none());
    drop(manager.acquire().await.unwrap());
    assert!(!manager.reap_idle().await);
}

#[tokio::test]
async fn test_disconnect_clears_instance() {
    let backend = ScriptedBackend::new();
    let manager = manager(&backend, Duration::from_secs(300));

    let first = manager.acquire().await.unwrap().instance_id();
    backend.state.disconnect();
    assert_eq!(manager.status().state, "idle");

    let lease = manager.acquire().await.unwrap();
    assert_ne!(lease.instance_id(), first);
    assert_eq!(backend.state.launches(), 2);
}

#[tokio::test]
async fn test_release_closes_instance() {
    let backend = ScriptedBackend::new();
    let manager = manager(&backend, Duration::from_secs(300));

    drop(manager.acquire().await.unwrap());
    assert!(manager.release("graceful-shutdown").await);
    assert_eq!(backend.state.closes(), 1);
    assert!(!manager.release("graceful-shutdown").await);
}

#[tokio::test]
async fn test_acquire_waits_for_released_launch_to_finish() {
    let backend = ScriptedBackend::new().with_launch_delay(Duration::from_millis(150));
    let manager = manager(&backend, Duration::from_secs(300));

    let first = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.acquire().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!manager.release("graceful-shutdown").await);
    assert_eq!(manager.status().state, "releasing");

    let second = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.acquire().await }
    });

    // Still inside the first launch: no second backend may start yet.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(backend.state.launches(), 1);

    assert!(matches!(first.await.unwrap(), Err(Error::BackendLaunch(_))));
    let lease = second.await.unwrap().unwrap();
    assert!(lease.freshly_created());
    assert_eq!(backend.state.launches(), 2);
    assert_eq!(backend.state.closes(), 1);
    assert_eq!(manager.status().state, "ready");
}
