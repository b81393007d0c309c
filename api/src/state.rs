use std::sync::Arc;

use database_manager::db::{ConnectionFactory, PgConnector};
use database_manager::{DatabaseManager, Db};

/// Application state shared across all handlers
#[derive(Debug)]
pub struct AppState<F: ConnectionFactory = PgConnector> {
    pub manager: Arc<DatabaseManager<F>>,
    pub db: Db<F>,
}

impl<F: ConnectionFactory> AppState<F> {
    pub fn new(manager: Arc<DatabaseManager<F>>) -> Self {
        let db = manager.db();
        Self { manager, db }
    }
}

impl<F: ConnectionFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            db: self.db.clone(),
        }
    }
}
