// Driver seam: how a pool obtains, checks and releases physical connections
// The production implementation is PostgreSQL through sqlx

use crate::errors::ConnectionError;
use crate::models::ConnectionDescriptor;
use async_trait::async_trait;
use sqlx::postgres::PgConnection;
use sqlx::Connection;
use tracing::{debug, warn};

/// Opens and manages physical connections for a pool.
///
/// The pool owns the bookkeeping (leases, bounds, state); the factory only
/// knows how to talk to the driver.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open one new physical connection
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Self::Connection, ConnectionError>;

    /// Verify the connection is still usable
    async fn ping(
        &self,
        descriptor: &ConnectionDescriptor,
        connection: &mut Self::Connection,
    ) -> Result<(), ConnectionError>;

    /// Close the connection, releasing its socket
    async fn disconnect(&self, connection: Self::Connection);
}

/// PostgreSQL connections via sqlx
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl ConnectionFactory for PgConnector {
    type Connection = PgConnection;

    #[tracing::instrument(skip(self, descriptor), fields(database = %descriptor.identifier()))]
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<PgConnection, ConnectionError> {
        let identifier = descriptor.identifier();
        let timeout = descriptor.connect_timeout();

        let connection = tokio::time::timeout(timeout, PgConnection::connect(descriptor.uri()))
            .await
            .map_err(|_| ConnectionError::Timeout {
                identifier,
                timeout,
            })?
            .map_err(|e| {
                tracing::error!(error = %e, uri = %descriptor.redacted_uri(), "Failed to open database connection");
                ConnectionError::ConnectFailed {
                    identifier,
                    reason: e.to_string(),
                }
            })?;

        debug!("Database connection opened");
        Ok(connection)
    }

    async fn ping(
        &self,
        descriptor: &ConnectionDescriptor,
        connection: &mut PgConnection,
    ) -> Result<(), ConnectionError> {
        connection
            .ping()
            .await
            .map_err(|e| ConnectionError::HealthCheckFailed {
                identifier: descriptor.identifier(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self, connection: PgConnection) {
        if let Err(e) = connection.close().await {
            warn!(error = %e, "Error while closing database connection");
        }
    }
}
