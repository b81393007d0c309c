// In-process connector for tests and local runs without a database server
// Failures can be injected per database to exercise startup and retry paths

use super::connector::ConnectionFactory;
use super::lock;
use crate::errors::ConnectionError;
use crate::models::{ConnectionDescriptor, DatabaseIdentifier};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Connection handed out by `MemoryConnector`
#[derive(Debug, PartialEq, Eq)]
pub struct MemoryConnection {
    pub id: u64,
    pub identifier: DatabaseIdentifier,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: AtomicU64,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    failing_connects: Mutex<HashSet<DatabaseIdentifier>>,
    failing_pings: Mutex<HashSet<DatabaseIdentifier>>,
    transient_failures: Mutex<HashMap<DatabaseIdentifier, u32>>,
    connect_budgets: Mutex<HashMap<DatabaseIdentifier, u32>>,
    connect_delay: Mutex<Option<Duration>>,
}

/// Cloneable handle; clones share counters and injected failures
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<MemoryState>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connect to `identifier` fail until cleared
    pub fn fail_connects(&self, identifier: DatabaseIdentifier) {
        lock(&self.state.failing_connects).insert(identifier);
    }

    /// Make the next `count` connects to `identifier` fail, then succeed
    pub fn fail_next_connects(&self, identifier: DatabaseIdentifier, count: u32) {
        lock(&self.state.transient_failures).insert(identifier, count);
    }

    /// Let `successes` more connects to `identifier` through, then fail the rest
    pub fn fail_connects_after(&self, identifier: DatabaseIdentifier, successes: u32) {
        lock(&self.state.connect_budgets).insert(identifier, successes);
    }

    /// Make every ping on `identifier` fail until cleared
    pub fn fail_pings(&self, identifier: DatabaseIdentifier) {
        lock(&self.state.failing_pings).insert(identifier);
    }

    /// Remove all injected failures for `identifier`
    pub fn heal(&self, identifier: DatabaseIdentifier) {
        lock(&self.state.failing_connects).remove(&identifier);
        lock(&self.state.failing_pings).remove(&identifier);
        lock(&self.state.transient_failures).remove(&identifier);
        lock(&self.state.connect_budgets).remove(&identifier);
    }

    /// Delay every connect, simulating a slow network
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *lock(&self.state.connect_delay) = delay;
    }

    /// Successful connects so far
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet disconnected (dropped ones included)
    pub fn live_connections(&self) -> usize {
        self.connects().saturating_sub(self.disconnects())
    }

    fn take_transient_failure(&self, identifier: DatabaseIdentifier) -> bool {
        let mut failures = lock(&self.state.transient_failures);
        match failures.get_mut(&identifier) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn budget_exhausted(&self, identifier: DatabaseIdentifier) -> bool {
        let mut budgets = lock(&self.state.connect_budgets);
        match budgets.get_mut(&identifier) {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<MemoryConnection, ConnectionError> {
        let identifier = descriptor.identifier();

        let delay = *lock(&self.state.connect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.state.failing_connects).contains(&identifier)
            || self.take_transient_failure(identifier)
            || self.budget_exhausted(identifier)
        {
            return Err(ConnectionError::ConnectFailed {
                identifier,
                reason: "connection refused".to_string(),
            });
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            identifier,
        })
    }

    async fn ping(
        &self,
        descriptor: &ConnectionDescriptor,
        _connection: &mut MemoryConnection,
    ) -> Result<(), ConnectionError> {
        let identifier = descriptor.identifier();
        if lock(&self.state.failing_pings).contains(&identifier) {
            return Err(ConnectionError::HealthCheckFailed {
                identifier,
                reason: "ping failed".to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self, _connection: MemoryConnection) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
