// Database registry: exactly one pool per logical database
// One write-once slot per identifier; reads are a plain indexed load

use super::connector::{ConnectionFactory, PgConnector};
use super::pool::ConnectionPool;
use crate::errors::RegistryError;
use crate::models::DatabaseIdentifier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tracing::{info, instrument, warn};

/// Process-wide table from `DatabaseIdentifier` to its `ConnectionPool`.
///
/// Concurrent `register` calls for the same identifier race on a `OnceLock`:
/// the first writer wins and later writers get `DuplicateRegistration`.
/// After `seal()` no further registration is accepted, after `terminate()`
/// no lookup succeeds.
pub struct DatabaseRegistry<F: ConnectionFactory = PgConnector> {
    slots: [OnceLock<ConnectionPool<F>>; DatabaseIdentifier::COUNT],
    sealed: AtomicBool,
    terminated: AtomicBool,
}

impl<F: ConnectionFactory> DatabaseRegistry<F> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| OnceLock::new()),
            sealed: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    /// Register the pool for `identifier`.
    ///
    /// # Errors
    /// - `DuplicateRegistration` if a pool is already registered; the
    ///   existing pool is untouched and the rejected one is dropped
    /// - `RegistrationClosed` after startup has sealed the registry
    #[instrument(skip(self, pool), fields(database = %identifier))]
    pub fn register(
        &self,
        identifier: DatabaseIdentifier,
        pool: ConnectionPool<F>,
    ) -> Result<&ConnectionPool<F>, RegistryError> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(RegistryError::RegistrationClosed(identifier));
        }
        debug_assert_eq!(pool.identifier(), identifier, "pool registered under the wrong name");

        let slot = &self.slots[identifier.index()];
        if slot.set(pool).is_err() {
            warn!("Rejected duplicate pool registration");
            return Err(RegistryError::DuplicateRegistration(identifier));
        }

        info!("Connection pool registered");
        slot.get()
            .ok_or(RegistryError::UnregisteredDatabase(identifier))
    }

    /// Look up the pool for `identifier`. No locking, no allocation.
    #[inline]
    pub fn resolve(&self, identifier: DatabaseIdentifier) -> Result<&ConnectionPool<F>, RegistryError> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(RegistryError::Terminated);
        }
        self.slots[identifier.index()]
            .get()
            .ok_or(RegistryError::UnregisteredDatabase(identifier))
    }

    pub fn is_registered(&self, identifier: DatabaseIdentifier) -> bool {
        self.slots[identifier.index()].get().is_some()
    }

    /// Registered pools in identifier order. Works after termination so
    /// shutdown can still reach every pool.
    pub fn pools(&self) -> impl Iterator<Item = &ConnectionPool<F>> {
        self.slots.iter().filter_map(OnceLock::get)
    }

    pub fn len(&self) -> usize {
        self.pools().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close registration; called once startup has registered every pool
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Make every later `resolve` fail with `Terminated`
    pub fn terminate(&self) {
        self.sealed.store(true, Ordering::SeqCst);
        self.terminated.store(true, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Close every registered pool. Idempotent, like `ConnectionPool::close`.
    pub async fn close_all(&self) {
        for pool in self.pools() {
            pool.close().await;
        }
    }
}

impl<F: ConnectionFactory> Default for DatabaseRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for DatabaseRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRegistry")
            .field(
                "registered",
                &self.pools().map(|p| p.identifier()).collect::<Vec<_>>(),
            )
            .field("sealed", &self.is_sealed())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
