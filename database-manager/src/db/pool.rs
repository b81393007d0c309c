// Connection pool for one logical database
// Bounded by a semaphore: at most max_connections leases exist at any time

use super::connector::{ConnectionFactory, PgConnector};
use super::lock;
use crate::errors::{ConnectionError, PoolError};
use crate::models::{ConnectionDescriptor, DatabaseIdentifier, PoolState, PoolStatus};
use crate::retry::{ExponentialBackoff, RetryStrategy};
use metrics::{counter, gauge, histogram};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore, SemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Pool of connections to a single physical database.
///
/// Owned by its registry slot and never cloned. Callers borrow connections
/// through [`Lease`], which returns the connection when dropped, so every
/// exit path (success, error, cancellation) releases it.
pub struct ConnectionPool<F: ConnectionFactory = PgConnector> {
    descriptor: ConnectionDescriptor,
    factory: Arc<F>,
    permits: Semaphore,
    idle: Mutex<Vec<F::Connection>>,
    /// Physical connections held, idle + leased
    size: AtomicUsize,
    leased: AtomicUsize,
    state: AtomicU8,
    drained: Notify,
    retry: ExponentialBackoff,
    /// Disconnects still running for discarded or late-returned connections
    disposals: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Open the pool and eagerly establish `max(min_connections, 1)` connections.
    ///
    /// Startup connections are not retried: a database that cannot be reached
    /// now fails the whole startup.
    ///
    /// # Errors
    /// Returns the first `ConnectionError` hit while warming the pool; any
    /// connections opened before it are closed.
    #[instrument(skip(descriptor, factory), fields(database = %descriptor.identifier(), max_connections = descriptor.max_connections()))]
    pub async fn open(
        descriptor: ConnectionDescriptor,
        factory: Arc<F>,
    ) -> Result<Self, ConnectionError> {
        info!(uri = %descriptor.redacted_uri(), "Opening connection pool");

        let max = descriptor.max_connections() as usize;
        let warm = (descriptor.min_connections() as usize).max(1).min(max);
        let retry =
            ExponentialBackoff::for_connections(descriptor.retry_base_delay(), descriptor.connect_retries());

        let pool = Self {
            permits: Semaphore::new(max),
            idle: Mutex::new(Vec::with_capacity(max)),
            size: AtomicUsize::new(0),
            leased: AtomicUsize::new(0),
            state: AtomicU8::new(PoolState::Open.as_u8()),
            drained: Notify::new(),
            retry,
            disposals: Mutex::new(Vec::new()),
            descriptor,
            factory,
        };

        for _ in 0..warm {
            match pool.factory.connect(&pool.descriptor).await {
                Ok(connection) => {
                    pool.size.fetch_add(1, Ordering::SeqCst);
                    lock(&pool.idle).push(connection);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to open connection pool");
                    pool.close().await;
                    return Err(e);
                }
            }
        }

        pool.record_size();
        info!(connections = warm, "Connection pool opened");
        Ok(pool)
    }

    pub fn identifier(&self) -> DatabaseIdentifier {
        self.descriptor.identifier()
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Number of leases currently outstanding, including acquires that hold a
    /// slot and are still opening their connection
    pub fn leased(&self) -> usize {
        self.leased.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            identifier: self.identifier(),
            state: self.state(),
            size: self.size.load(Ordering::SeqCst),
            idle: lock(&self.idle).len(),
            leased: self.leased(),
            max_connections: self.descriptor.max_connections(),
        }
    }

    /// Borrow a connection.
    ///
    /// Waits up to the configured acquire timeout when every connection is
    /// leased. Dropping the returned future while it waits leaves no lease
    /// behind.
    ///
    /// # Errors
    /// - `PoolError::Closed` once the pool is draining or closed
    /// - `PoolError::Exhausted` when no connection frees up in time
    /// - `PoolError::Connection` when a new connection cannot be opened
    #[instrument(skip(self), fields(database = %self.identifier()))]
    pub async fn acquire(&self) -> Result<Lease<'_, F>, PoolError> {
        let identifier = self.identifier();
        self.ensure_open()?;

        let started = Instant::now();
        let timeout = self.descriptor.acquire_timeout();
        let permit = match tokio::time::timeout(timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            // the semaphore is closed when draining starts
            Ok(Err(_)) => return Err(PoolError::Closed(identifier)),
            Err(_) => {
                counter!("db_pool_acquire_timeouts_total", "database" => identifier.as_str())
                    .increment(1);
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    leased = self.leased(),
                    "Connection pool exhausted"
                );
                return Err(PoolError::Exhausted {
                    identifier,
                    timeout,
                });
            }
        };
        histogram!("db_pool_acquire_wait_seconds", "database" => identifier.as_str())
            .record(started.elapsed().as_secs_f64());

        // counted from here on, so a drain waits for an acquire still dialing
        let pending = PendingLease::new(self);
        self.ensure_open()?;

        let idle = lock(&self.idle).pop();
        let connection = match idle {
            Some(connection) => connection,
            None => self.connect_with_retry().await?,
        };

        // draining or closing may have started while dialing
        if let Err(e) = self.ensure_open() {
            debug!("Pool closed while opening a connection, discarding it");
            self.dispose(connection);
            return Err(e);
        }

        Ok(pending.into_lease(connection, permit))
    }

    /// Return a lease early. Equivalent to dropping it.
    pub fn release(&self, lease: Lease<'_, F>) {
        debug_assert!(std::ptr::eq(lease.pool, self), "lease released to the wrong pool");
        drop(lease);
    }

    /// Check the pool can hand out a working connection.
    ///
    /// A connection that fails its ping is discarded instead of returned.
    #[instrument(skip(self), fields(database = %self.identifier()))]
    pub async fn check_health(&self) -> Result<(), PoolError> {
        let mut lease = self.acquire().await?;
        if let Err(e) = self.factory.ping(&self.descriptor, &mut *lease).await {
            lease.discard();
            return Err(e.into());
        }
        debug!("Database health check passed");
        Ok(())
    }

    /// `check_health` as a boolean, logging the reason on failure
    pub async fn health_check(&self) -> bool {
        match self.check_health().await {
            Ok(()) => true,
            Err(e) => {
                warn!(database = %self.identifier(), error = %e, "Database health check failed");
                false
            }
        }
    }

    /// Move Open → Draining. New and waiting acquirers get `PoolError::Closed`;
    /// outstanding leases keep working. Returns false if already draining or closed.
    pub fn begin_drain(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(
                PoolState::Open.as_u8(),
                PoolState::Draining.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if changed {
            self.permits.close();
            info!(database = %self.identifier(), leased = self.leased(), "Connection pool draining");
        }
        changed
    }

    /// Wait until every lease is returned or `grace` elapses.
    /// Returns true if the pool drained in time.
    pub async fn wait_drained(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // register before checking so a release in between is not missed
            notified.as_mut().enable();

            if self.leased() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.leased() == 0;
            }
        }
    }

    /// Close the pool. Idempotent: calls after the first do nothing.
    ///
    /// Rejects new acquires immediately, disconnects idle connections and
    /// waits for disconnects already started for discarded ones. Connections
    /// still leased are disconnected in the background as their leases are
    /// released; once the runtime is gone the driver can only drop the socket.
    #[instrument(skip(self), fields(database = %self.identifier()))]
    pub async fn close(&self) {
        let idle = {
            let mut idle = lock(&self.idle);
            let previous = self.state.swap(PoolState::Closed.as_u8(), Ordering::SeqCst);
            if previous == PoolState::Closed.as_u8() {
                return;
            }
            std::mem::take(&mut *idle)
        };
        self.permits.close();

        for connection in idle {
            self.size.fetch_sub(1, Ordering::SeqCst);
            self.factory.disconnect(connection).await;
        }
        self.record_size();

        let pending = std::mem::take(&mut *lock(&self.disposals));
        for disposal in pending {
            if let Err(e) = disposal.await {
                warn!(error = %e, "Connection disconnect task failed");
            }
        }

        let outstanding = self.leased();
        if outstanding > 0 {
            warn!(
                outstanding_leases = outstanding,
                "Connection pool closed with outstanding leases"
            );
        } else {
            info!("Connection pool closed");
        }
    }

    fn ensure_open(&self) -> Result<(), PoolError> {
        match self.state() {
            PoolState::Open => Ok(()),
            PoolState::Draining | PoolState::Closed => Err(PoolError::Closed(self.identifier())),
        }
    }

    /// Open a new connection, retrying transient failures with backoff
    async fn connect_with_retry(&self) -> Result<F::Connection, PoolError> {
        let identifier = self.identifier();
        let mut attempt = 0;
        loop {
            match self.factory.connect(&self.descriptor).await {
                Ok(connection) => {
                    self.size.fetch_add(1, Ordering::SeqCst);
                    self.record_size();
                    return Ok(connection);
                }
                Err(e) => {
                    counter!("db_pool_connect_failures_total", "database" => identifier.as_str())
                        .increment(1);
                    let Some(delay) = self.retry.next_delay(attempt) else {
                        tracing::error!(error = %e, attempts = attempt + 1, "Giving up opening database connection");
                        return Err(e.into());
                    };
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying database connection"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    self.ensure_open()?;
                }
            }
        }
    }

    fn return_connection(&self, connection: F::Connection, discard: bool) {
        {
            let mut idle = lock(&self.idle);
            // checked under the idle lock so close() cannot miss a returned connection
            if !discard && self.state() != PoolState::Closed {
                idle.push(connection);
                return;
            }
        }
        self.dispose(connection);
    }

    fn dispose(&self, connection: F::Connection) {
        self.size.fetch_sub(1, Ordering::SeqCst);
        self.record_size();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let factory = Arc::clone(&self.factory);
                let disposal = handle.spawn(async move { factory.disconnect(connection).await });
                let mut disposals = lock(&self.disposals);
                disposals.retain(|d| !d.is_finished());
                disposals.push(disposal);
            }
            // outside a runtime the driver closes the socket on drop
            Err(_) => drop(connection),
        }
    }

    fn start_lease(&self) {
        let leased = self.leased.fetch_add(1, Ordering::SeqCst) + 1;
        gauge!("db_pool_leases", "database" => self.identifier().as_str()).set(leased as f64);
    }

    fn finish_lease(&self) {
        let remaining = self.leased.fetch_sub(1, Ordering::SeqCst) - 1;
        gauge!("db_pool_leases", "database" => self.identifier().as_str()).set(remaining as f64);
        if remaining == 0 {
            self.drained.notify_waiters();
        }
    }

    fn record_size(&self) {
        gauge!("db_pool_connections", "database" => self.identifier().as_str())
            .set(self.size.load(Ordering::SeqCst) as f64);
    }
}

impl<F: ConnectionFactory> fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .field("size", &self.size.load(Ordering::SeqCst))
            .field("leased", &self.leased())
            .finish()
    }
}

/// A borrowed connection. Returned to its pool on drop.
pub struct Lease<'a, F: ConnectionFactory = PgConnector> {
    pool: &'a ConnectionPool<F>,
    connection: Option<F::Connection>,
    discard: bool,
    acquired_at: Instant,
    // released after Drop::drop has decremented the lease count
    _permit: SemaphorePermit<'a>,
}

/// Lease count held by an acquire that has a permit but no connection yet.
/// Dropped on error or cancellation, it gives the count back.
struct PendingLease<'a, F: ConnectionFactory> {
    pool: &'a ConnectionPool<F>,
    armed: bool,
}

impl<'a, F: ConnectionFactory> PendingLease<'a, F> {
    fn new(pool: &'a ConnectionPool<F>) -> Self {
        pool.start_lease();
        Self { pool, armed: true }
    }

    fn into_lease(mut self, connection: F::Connection, permit: SemaphorePermit<'a>) -> Lease<'a, F> {
        self.armed = false;
        Lease {
            pool: self.pool,
            connection: Some(connection),
            discard: false,
            acquired_at: Instant::now(),
            _permit: permit,
        }
    }
}

impl<F: ConnectionFactory> Drop for PendingLease<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.finish_lease();
        }
    }
}

impl<'a, F: ConnectionFactory> Lease<'a, F> {
    pub fn identifier(&self) -> DatabaseIdentifier {
        self.pool.identifier()
    }

    /// How long this lease has been held
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Drop the lease and close its connection instead of pooling it,
    /// e.g. after the driver reported the connection broken.
    pub fn discard(mut self) {
        self.discard = true;
    }
}

impl<F: ConnectionFactory> Deref for Lease<'_, F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("BUG: lease used after its connection was returned")
    }
}

impl<F: ConnectionFactory> DerefMut for Lease<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("BUG: lease used after its connection was returned")
    }
}

impl<F: ConnectionFactory> Drop for Lease<'_, F> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.return_connection(connection, self.discard);
        }
        self.pool.finish_lease();
    }
}

impl<F: ConnectionFactory> fmt::Debug for Lease<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("database", &self.identifier())
            .field("held_for", &self.held_for())
            .field("discard", &self.discard)
            .finish()
    }
}
