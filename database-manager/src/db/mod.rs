// Database layer module
// Pools per logical database, the registry that owns them, and the accessor facade

pub mod connector;
pub mod facade;
pub mod memory;
pub mod pool;
pub mod registry;

pub use connector::{ConnectionFactory, PgConnector};
pub use facade::{Database, Db, Table};
pub use memory::{MemoryConnection, MemoryConnector};
pub use pool::{ConnectionPool, Lease};
pub use registry::DatabaseRegistry;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, ignoring poisoning. Critical sections here never panic
/// midway through an update, so the data is consistent either way.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
