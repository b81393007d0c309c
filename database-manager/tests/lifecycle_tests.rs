// Startup and shutdown scenarios for the database manager
// Feature: database-manager

use database_manager::config::Settings;
use database_manager::db::MemoryConnector;
use database_manager::resolver::EnvSnapshot;
use database_manager::{
    DatabaseIdentifier, DatabaseManager, PoolError, PoolState, RegistryError, StartupError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn env() -> EnvSnapshot {
    [
        ("DATABASE_URI_SCHOOL", "memory://school-db/school"),
        ("DATABASE_URI_AUTH", "memory://auth-db/auth"),
        ("DATABASE_URI_PAYMENTS", "memory://payments-db/payments"),
    ]
    .into_iter()
    .collect()
}

fn settings(grace_ms: u64) -> Settings {
    let mut settings = Settings::default();
    settings.pool.max_connections = 2;
    settings.pool.acquire_timeout_ms = 100;
    settings.pool.connect_retries = 0;
    settings.lifecycle.shutdown_grace_period_ms = grace_ms;
    settings
}

async fn start(grace_ms: u64) -> (Arc<DatabaseManager<MemoryConnector>>, MemoryConnector) {
    let connector = MemoryConnector::new();
    let manager = DatabaseManager::startup(&settings(grace_ms), &env(), Arc::new(connector.clone()))
        .await
        .unwrap();
    (Arc::new(manager), connector)
}

/// A lease that is never returned holds shutdown for the full grace period,
/// is reported as undrained, and the pool still ends Closed.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_with_outstanding_lease_waits_for_grace_period() {
    let (manager, _connector) = start(100).await;
    let db = manager.db();
    let lease = db.school().unwrap().acquire().await.unwrap();

    let started = Instant::now();
    let report = manager.shutdown().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(100), "returned after {:?}", elapsed);
    assert_eq!(report.undrained, vec![(DatabaseIdentifier::School, 1)]);
    assert_eq!(report.drained.len(), DatabaseIdentifier::COUNT - 1);
    assert!(!report.is_clean());
    assert!(manager
        .statuses()
        .iter()
        .all(|status| status.state == PoolState::Closed));

    drop(lease);
}

/// A lease returned during the grace period lets shutdown finish early
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_completes_once_lease_is_returned() {
    let (manager, connector) = start(5_000).await;
    let db = manager.db();
    let lease = db.auth().unwrap().acquire().await.unwrap();

    let shutdown = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.shutdown().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!shutdown.is_finished());
    // lookups are refused as soon as shutdown begins
    assert_eq!(
        db.auth().map(|_| ()).unwrap_err(),
        RegistryError::Terminated
    );

    let started = Instant::now();
    drop(lease);
    let report = shutdown.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(report.is_clean());
    assert_eq!(report.drained.len(), DatabaseIdentifier::COUNT);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(connector.live_connections(), 0);
}

/// Every resolve through the facade hands out the same pool
#[tokio::test]
async fn facade_resolves_are_stable() {
    let (manager, _connector) = start(100).await;
    let db = manager.db();
    let other = db.clone();

    for _ in 0..10 {
        let first = db.payments().unwrap().acquire().await.unwrap();
        assert_eq!(first.identifier(), DatabaseIdentifier::Payments);
        drop(first);
        assert_eq!(
            other.payments().unwrap().status(),
            db.payments().unwrap().status()
        );
    }
    assert_eq!(db.payments().unwrap().status().leased, 0);
}

/// Handles taken before shutdown fail their next acquire on the closed pool
#[tokio::test]
async fn acquire_after_shutdown_is_rejected() {
    let (manager, _connector) = start(50).await;
    let db = manager.db();
    let school = db.school().unwrap();

    manager.shutdown().await;

    assert_eq!(
        school.acquire().await.unwrap_err(),
        PoolError::Closed(DatabaseIdentifier::School)
    );
    assert_eq!(db.school().map(|_| ()).unwrap_err(), RegistryError::Terminated);
}

/// A database that fails to connect after a transient blip is still
/// reported at startup, because startup never retries
#[tokio::test]
async fn startup_does_not_retry_connect_failures() {
    let connector = MemoryConnector::new();
    connector.fail_next_connects(DatabaseIdentifier::School, 1);

    let result =
        DatabaseManager::startup(&settings(100), &env(), Arc::new(connector.clone())).await;

    assert!(matches!(result, Err(StartupError::Connection(_))));
    assert_eq!(connector.live_connections(), 0);
}
