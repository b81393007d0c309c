// Lifecycle controller: fail-fast startup, readiness, bounded-grace shutdown

use crate::config::Settings;
use crate::db::{ConnectionFactory, ConnectionPool, DatabaseRegistry, Db, PgConnector};
use crate::errors::{PoolError, StartupError};
use crate::models::{DatabaseIdentifier, PoolStatus};
use crate::resolver::{self, EnvSnapshot};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Owns the registry for the life of the process.
///
/// Built by [`DatabaseManager::startup`]; application code receives the
/// [`Db`] facade from [`DatabaseManager::db`] and never sees the registry.
pub struct DatabaseManager<F: ConnectionFactory = PgConnector> {
    registry: Arc<DatabaseRegistry<F>>,
    grace_period: Duration,
}

/// Aggregate health, as served by the readiness probe
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub databases: Vec<DatabaseHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseHealth {
    pub identifier: DatabaseIdentifier,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: PoolStatus,
}

/// Outcome of shutdown: which pools drained within the grace period
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub drained: Vec<DatabaseIdentifier>,
    /// Pools closed with leases still outstanding, and how many
    pub undrained: Vec<(DatabaseIdentifier, usize)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.undrained.is_empty()
    }
}

impl<F: ConnectionFactory> DatabaseManager<F> {
    /// Resolve configuration, open and register every pool, health-check them.
    ///
    /// Any failure closes whatever was opened in this pass and returns the
    /// error; no partially initialized registry outlives this call.
    #[instrument(skip_all)]
    pub async fn startup(
        settings: &Settings,
        env: &EnvSnapshot,
        factory: Arc<F>,
    ) -> Result<Self, StartupError> {
        info!("Starting database manager");

        // 1. configuration, before any socket is opened
        let descriptors = resolver::resolve(env, &settings.pool).map_err(|e| {
            error!(error = %e, "Database configuration is invalid");
            e
        })?;
        info!(databases = descriptors.len(), "Database configuration resolved");

        // 2. open and register every pool
        let registry = DatabaseRegistry::new();
        for (identifier, descriptor) in descriptors {
            let pool = match ConnectionPool::open(descriptor, Arc::clone(&factory)).await {
                Ok(pool) => pool,
                Err(e) => {
                    error!(database = %identifier, error = %e, "Failed to open pool, aborting startup");
                    abort(&registry).await;
                    return Err(e.into());
                }
            };
            if let Err(e) = registry.register(identifier, pool) {
                abort(&registry).await;
                return Err(e.into());
            }
        }

        // 3. health check every pool
        let checks = join_all(registry.pools().map(|pool| async move {
            (pool.identifier(), pool.check_health().await)
        }))
        .await;
        if let Some((identifier, Err(e))) = checks.into_iter().find(|(_, result)| result.is_err()) {
            error!(database = %identifier, error = %e, "Startup health check failed");
            abort(&registry).await;
            return Err(e.into());
        }

        registry.seal();
        info!(databases = registry.len(), "Database manager started");

        Ok(Self {
            registry: Arc::new(registry),
            grace_period: settings.lifecycle.shutdown_grace_period(),
        })
    }

    /// The accessor facade
    pub fn db(&self) -> Db<F> {
        Db::new(Arc::clone(&self.registry))
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn is_terminated(&self) -> bool {
        self.registry.is_terminated()
    }

    /// Status of every registered pool, without touching the database
    pub fn statuses(&self) -> Vec<PoolStatus> {
        self.registry.pools().map(ConnectionPool::status).collect()
    }

    /// Health of every pool, checked concurrently. Ready only if all are healthy.
    #[instrument(skip(self))]
    pub async fn readiness(&self) -> ReadinessReport {
        if self.registry.is_terminated() {
            return ReadinessReport {
                ready: false,
                databases: self
                    .registry
                    .pools()
                    .map(|pool| DatabaseHealth {
                        identifier: pool.identifier(),
                        healthy: false,
                        error: Some(PoolError::Closed(pool.identifier()).to_string()),
                        status: pool.status(),
                    })
                    .collect(),
            };
        }

        let databases: Vec<DatabaseHealth> = join_all(self.registry.pools().map(|pool| async move {
            let result = pool.check_health().await;
            if let Err(e) = &result {
                warn!(database = %pool.identifier(), error = %e, "Readiness check failed");
            }
            DatabaseHealth {
                identifier: pool.identifier(),
                healthy: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
                status: pool.status(),
            }
        }))
        .await;

        ReadinessReport {
            ready: !databases.is_empty() && databases.iter().all(|d| d.healthy),
            databases,
        }
    }

    /// Drain every pool for up to the grace period, then close them all and
    /// terminate the registry. Safe to call more than once.
    #[instrument(skip(self), fields(grace_period_ms = self.grace_period.as_millis() as u64))]
    pub async fn shutdown(&self) -> ShutdownReport {
        info!("Shutting down database manager");

        for pool in self.registry.pools() {
            pool.begin_drain();
        }
        self.registry.terminate();

        let grace = self.grace_period;
        let outcomes = join_all(self.registry.pools().map(|pool| async move {
            let drained = pool.wait_drained(grace).await;
            (pool.identifier(), drained, pool.leased())
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (identifier, drained, outstanding) in outcomes {
            if drained {
                report.drained.push(identifier);
            } else {
                warn!(
                    database = %identifier,
                    outstanding_leases = outstanding,
                    "Pool did not drain within grace period; closing anyway"
                );
                report.undrained.push((identifier, outstanding));
            }
        }

        self.registry.close_all().await;

        info!(
            drained = report.drained.len(),
            undrained = report.undrained.len(),
            "Database manager shut down"
        );
        report
    }
}

async fn abort<F: ConnectionFactory>(registry: &DatabaseRegistry<F>) {
    registry.terminate();
    registry.close_all().await;
}

impl<F: ConnectionFactory> std::fmt::Debug for DatabaseManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("registry", &self.registry)
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Initiating graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryConnector;
    use crate::errors::{ConfigError, ConnectionError, RegistryError};
    use crate::models::PoolState;

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

    #[tokio::test]
    async fn test_startup_registers_every_database() {
        let connector = MemoryConnector::new();
        let manager = DatabaseManager::startup(&settings(100), &env(), Arc::new(connector.clone()))
            .await
            .unwrap();

        let db = manager.db();
        for id in DatabaseIdentifier::ALL {
            assert_eq!(db.database(id).unwrap().identifier(), id);
        }
        assert_eq!(manager.statuses().len(), DatabaseIdentifier::COUNT);
        assert!(connector.connects() >= DatabaseIdentifier::COUNT);
    }

    #[tokio::test]
    async fn test_startup_with_missing_variable_opens_nothing() {
        let connector = MemoryConnector::new();
        let env: EnvSnapshot = [("DATABASE_URI_SCHOOL", "memory://school-db/school")]
            .into_iter()
            .collect();

        let result = DatabaseManager::startup(&settings(100), &env, Arc::new(connector.clone())).await;
        assert!(matches!(
            result,
            Err(StartupError::Config(ConfigError::MissingVariable(_)))
        ));
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_startup_connection_failure_closes_opened_pools() {
        let connector = MemoryConnector::new();
        connector.fail_connects(DatabaseIdentifier::Payments);

        let result = DatabaseManager::startup(&settings(100), &env(), Arc::new(connector.clone())).await;
        assert!(matches!(
            result,
            Err(StartupError::Connection(ConnectionError::ConnectFailed {
                identifier: DatabaseIdentifier::Payments,
                ..
            }))
        ));
        // school and auth were opened first and must be closed again
        assert_eq!(connector.connects(), 2);
        assert_eq!(connector.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_startup_health_failure_aborts() {
        let connector = MemoryConnector::new();
        connector.fail_pings(DatabaseIdentifier::Auth);

        let result = DatabaseManager::startup(&settings(100), &env(), Arc::new(connector.clone())).await;
        assert!(matches!(
            result,
            Err(StartupError::Pool(PoolError::Connection(
                ConnectionError::HealthCheckFailed {
                    identifier: DatabaseIdentifier::Auth,
                    ..
                }
            )))
        ));
    }

    #[tokio::test]
    async fn test_readiness_reflects_pool_health() {
        let connector = MemoryConnector::new();
        let manager = DatabaseManager::startup(&settings(100), &env(), Arc::new(connector.clone()))
            .await
            .unwrap();

        assert!(manager.readiness().await.ready);

        connector.fail_pings(DatabaseIdentifier::School);
        let report = manager.readiness().await;
        assert!(!report.ready);
        let school = report
            .databases
            .iter()
            .find(|d| d.identifier == DatabaseIdentifier::School)
            .unwrap();
        assert!(!school.healthy);
        assert!(school.error.is_some());
        assert!(report
            .databases
            .iter()
            .filter(|d| d.identifier != DatabaseIdentifier::School)
            .all(|d| d.healthy));
    }

    #[tokio::test]
    async fn test_clean_shutdown_terminates_registry() {
        let connector = MemoryConnector::new();
        let manager = DatabaseManager::startup(&settings(100), &env(), Arc::new(connector.clone()))
            .await
            .unwrap();
        let db = manager.db();

        let report = manager.shutdown().await;
        assert!(report.is_clean());
        assert_eq!(report.drained.len(), DatabaseIdentifier::COUNT);
        assert!(manager.is_terminated());
        assert_eq!(db.school().map(|_| ()).unwrap_err(), RegistryError::Terminated);
        assert!(manager
            .statuses()
            .iter()
            .all(|s| s.state == PoolState::Closed));
        assert_eq!(connector.live_connections(), 0);
        assert!(!manager.readiness().await.ready);

        // a second shutdown is harmless
        let again = manager.shutdown().await;
        assert!(again.is_clean());
    }
}
