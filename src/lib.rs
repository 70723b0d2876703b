//! # Contexter Sync
//!
//! Local sync and encryption engine: exports messages, contacts and
//! screenshots from this machine to a Contexter server the user controls,
//! optionally end-to-end encrypted.

pub mod api;
pub mod crypto;
pub mod db;
pub mod services;
pub mod store;
pub mod sync;

use api::{ContexterApiClient, TransportClient, TransportError};
use db::{Database, DbError};
use std::sync::Arc;
use store::ConfigStore;
use sync::{
    BackfillEngine, LocalDataSource, RegistryError, ServiceRegistry, SyncScheduler, SyncSource,
};

/// Load `.env` and initialise `env_logger` (default filter `info`).
///
/// Safe to call more than once.
pub fn init_logging() {
    dotenvy::dotenv().ok();

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

// ============================================================================
// Agent
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Database initialization failed: {0}")]
    Database(#[from] DbError),

    #[error("HTTP client initialization failed: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Shared state of the desktop agent: settings, transport and schedulers
pub struct SyncAgent {
    db: Arc<Database>,
    transport: Arc<ContexterApiClient>,
    registry: ServiceRegistry,
}

impl SyncAgent {
    pub fn new(db: Database) -> Result<Self, AgentError> {
        let db = Arc::new(db);
        let transport = Arc::new(ContexterApiClient::new(db.clone())?);
        let registry = ServiceRegistry::new(db.clone());

        Ok(Self {
            db,
            transport,
            registry,
        })
    }

    /// Agent backed by the database in the platform data directory
    pub fn open_default() -> Result<Self, AgentError> {
        let db = Database::open_default()?;
        log::info!("Database initialized successfully");
        Self::new(db)
    }

    pub fn store(&self) -> Arc<dyn ConfigStore> {
        self.db.clone()
    }

    pub fn transport(&self) -> Arc<dyn TransportClient> {
        self.transport.clone()
    }

    pub fn api_client(&self) -> &ContexterApiClient {
        &self.transport
    }

    /// Schedule a source; call [`ServiceRegistry::start_all`] to begin syncing
    pub fn register(&mut self, source: Arc<dyn SyncSource>) -> Result<SyncScheduler, AgentError> {
        Ok(self.registry.register(source)?)
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Backfill engine for `source`, sharing this agent's settings and transport
    pub fn backfill<S: LocalDataSource>(&self, name: &str, source: Arc<S>) -> BackfillEngine<S> {
        BackfillEngine::new(name, source, self.transport(), self.store())
    }
}
