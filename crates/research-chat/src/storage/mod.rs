//! Persistence adapter - users, interactions and events behind one capability trait
pub mod schema;
pub mod migration;
pub mod sqlite_store;

pub use schema::*;
pub use migration::MigrationManager;
pub use sqlite_store::SqliteStore;

use std::sync::Arc;
use async_trait::async_trait;
use tracing::info;

use crate::config::{Config, StorageBackend};

/// Storage capability used by the gateway. Every write completes before the
/// call returns; identifiers are generated by the store.
#[async_trait]
pub trait ResearchStore: Send + Sync {
    async fn get_user(&self, user_id: &str) -> anyhow::Result<Option<UserRecord>>;

    async fn create_user(&self, user_id: &str, max_requests: u32) -> anyhow::Result<UserRecord>;

    /// Applies the set fields; returns `None` when the user does not exist.
    async fn update_user(&self, user_id: &str, update: UserUpdate) -> anyhow::Result<Option<UserRecord>>;

    /// Atomically bumps the request count and touches last-active, returning the new count.
    async fn increment_request_count(&self, user_id: &str) -> anyhow::Result<u32>;

    async fn create_interaction(&self, interaction: NewInteraction) -> anyhow::Result<InteractionRecord>;

    /// Counts one submission and stores its interaction as a single unit:
    /// either both land or neither does. Returns the new request count.
    async fn record_submission(&self, interaction: NewInteraction) -> anyhow::Result<(u32, InteractionRecord)>;

    async fn create_event(&self, event: NewEvent) -> anyhow::Result<EventRecord>;

    async fn interactions_for_user(&self, user_id: &str) -> anyhow::Result<Vec<InteractionRecord>>;

    async fn interactions_for_session(&self, session_id: &str) -> anyhow::Result<Vec<InteractionRecord>>;

    async fn events_for_user(&self, user_id: &str) -> anyhow::Result<Vec<EventRecord>>;

    async fn events_for_session(&self, session_id: &str) -> anyhow::Result<Vec<EventRecord>>;

    async fn stats(&self) -> anyhow::Result<DatabaseStats>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Opens the backend selected by configuration.
pub fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn ResearchStore>> {
    match cfg.storage_backend {
        StorageBackend::Sqlite => {
            let store = SqliteStore::open(std::path::Path::new(&cfg.database_path))?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            info!("Using in-memory research database; records are lost on shutdown");
            Ok(Arc::new(SqliteStore::open_in_memory()?))
        }
        StorageBackend::Cosmos => Err(anyhow::anyhow!(
            "STORAGE_BACKEND=cosmos is not supported by this build; use 'sqlite' or 'memory'"
        )),
    }
}
