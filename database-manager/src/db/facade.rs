// Accessor facade: `db.school()?.table("students")` and friends
// The only path from application code to a connection

use super::connector::{ConnectionFactory, PgConnector};
use super::pool::{ConnectionPool, Lease};
use super::registry::DatabaseRegistry;
use crate::errors::{PoolError, RegistryError};
use crate::models::{DatabaseIdentifier, PoolStatus};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Typed entry point to every logical database.
///
/// Cheap to clone; hand one to each service at construction time.
pub struct Db<F: ConnectionFactory = PgConnector> {
    registry: Arc<DatabaseRegistry<F>>,
}

impl<F: ConnectionFactory> Clone for Db<F> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<F: ConnectionFactory> Db<F> {
    pub(crate) fn new(registry: Arc<DatabaseRegistry<F>>) -> Self {
        Self { registry }
    }

    pub fn school(&self) -> Result<Database<'_, F>, RegistryError> {
        self.database(DatabaseIdentifier::School)
    }

    pub fn auth(&self) -> Result<Database<'_, F>, RegistryError> {
        self.database(DatabaseIdentifier::Auth)
    }

    pub fn payments(&self) -> Result<Database<'_, F>, RegistryError> {
        self.database(DatabaseIdentifier::Payments)
    }

    /// Generic form of the named accessors
    pub fn database(&self, identifier: DatabaseIdentifier) -> Result<Database<'_, F>, RegistryError> {
        Ok(Database {
            pool: self.registry.resolve(identifier)?,
        })
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for Db<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").field("registry", &self.registry).finish()
    }
}

/// Handle to one logical database
pub struct Database<'a, F: ConnectionFactory = PgConnector> {
    pool: &'a ConnectionPool<F>,
}

impl<F: ConnectionFactory> Clone for Database<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F: ConnectionFactory> Copy for Database<'_, F> {}

impl<'a, F: ConnectionFactory> Database<'a, F> {
    pub fn identifier(&self) -> DatabaseIdentifier {
        self.pool.identifier()
    }

    /// Handle scoped to one table or collection
    pub fn table(&self, name: &'a str) -> Table<'a, F> {
        Table {
            pool: self.pool,
            name,
        }
    }

    /// Borrow a connection for a multi-table operation
    pub async fn acquire(&self) -> Result<Lease<'a, F>, PoolError> {
        self.pool.acquire().await
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }
}

/// Handle to a table or collection within one logical database
pub struct Table<'a, F: ConnectionFactory = PgConnector> {
    pool: &'a ConnectionPool<F>,
    name: &'a str,
}

impl<F: ConnectionFactory> Clone for Table<'_, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F: ConnectionFactory> Copy for Table<'_, F> {}

impl<'a, F: ConnectionFactory> Table<'a, F> {
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn database(&self) -> DatabaseIdentifier {
        self.pool.identifier()
    }

    pub async fn acquire(&self) -> Result<Lease<'a, F>, PoolError> {
        self.pool.acquire().await
    }

    /// Run one logical operation on a leased connection.
    ///
    /// The lease is released when `op` finishes, whether it succeeds, fails,
    /// or the returned future is dropped.
    ///
    /// ```ignore
    /// let count = db.school()?.table("students").run(|conn, table| Box::pin(async move {
    ///     let sql = format!("SELECT count(*) FROM {table}");
    ///     sqlx::query_scalar::<_, i64>(&sql).fetch_one(conn).await.map_err(query_failed)
    /// })).await?;
    /// ```
    pub async fn run<T, E, Op>(&self, op: Op) -> Result<T, E>
    where
        Op: for<'c> FnOnce(&'c mut F::Connection, &'c str) -> BoxFuture<'c, Result<T, E>>,
        E: From<PoolError>,
    {
        let mut lease = self.pool.acquire().await?;
        op(&mut *lease, self.name).await
    }
}
