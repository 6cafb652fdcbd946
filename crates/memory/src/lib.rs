//! Conversation storage for LocalForge.
//!
//! Backends:
//! - **SQLite** (default): durable log in `~/.localforge/localforge.db`
//! - **In-memory**: for tests and ephemeral sessions

pub mod in_memory;
pub mod sqlite;

use std::sync::Arc;

use localforge_config::StorageConfig;
use localforge_core::error::StoreError;
use localforge_core::store::ConversationStore;
use tracing::info;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Open the backend named in configuration.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn ConversationStore>, StoreError> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteStore::open(&config.database_path()).await?)),
        "memory" | "in_memory" => {
            info!("Using in-memory conversation store; history is lost on exit");
            Ok(Arc::new(InMemoryStore::new()))
        }
        other => Err(StoreError::Storage(format!("unknown storage backend '{other}'"))),
    }
}
