// Centralized database connection-pool manager
//
// One pool per logical database, handed out through a typed facade, with
// fail-fast startup and bounded-grace shutdown.

pub mod config;
pub mod db;
pub mod errors;
pub mod lifecycle;
pub mod models;
pub mod resolver;
pub mod retry;
pub mod telemetry;

pub use db::{Database, Db, Lease, Table};
pub use errors::{
    ConfigError, ConnectionError, DatabaseError, PoolError, RegistryError, StartupError,
};
pub use lifecycle::{DatabaseManager, ReadinessReport, ShutdownReport};
pub use models::{ConnectionDescriptor, DatabaseIdentifier, PoolState, PoolStatus};
