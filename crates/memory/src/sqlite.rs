//! SQLite conversation store.
//!
//! Uses a single SQLite database file with two tables:
//! - `conversations`: one row per chat with its title and model
//! - `messages`: the ordered log, content stored as JSON
//!
//! Deleting a conversation cascades to its messages.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use localforge_core::error::StoreError;
use localforge_core::message::{Content, Message, Role};
use localforge_core::store::{Conversation, ConversationStore, StoredMessage};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

/// Conversations persisted in SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn storage(e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(e.to_string())
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| storage(format!("bad timestamp '{s}': {e}")))
}

fn parse_role(s: &str) -> Result<Role, StoreError> {
    match s {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(storage(format!("unknown role '{other}'"))),
    }
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    ///
    /// Parent directories and the schema are created automatically.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(storage)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(path = %path.display(), "SQLite conversation store initialized");
        Ok(store)
    }

    /// An ephemeral database living as long as the store (useful for tests).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(storage)?
            .foreign_keys(true);

        // One connection that never idles out, or the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL DEFAULT '',
                model       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversations table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq             INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT UNIQUE NOT NULL,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                tool_call_id    TEXT,
                created_at      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_conversation(row: &SqliteRow) -> Result<Conversation, StoreError> {
        Ok(Conversation {
            id: row.try_get("id").map_err(storage)?,
            title: row.try_get("title").map_err(storage)?,
            model: row.try_get("model").map_err(storage)?,
            created_at: parse_timestamp(row.try_get("created_at").map_err(storage)?)?,
            updated_at: parse_timestamp(row.try_get("updated_at").map_err(storage)?)?,
        })
    }

    fn row_to_message(row: &SqliteRow) -> Result<StoredMessage, StoreError> {
        let content: String = row.try_get("content").map_err(storage)?;
        let content: Content = serde_json::from_str(&content).map_err(storage)?;
        Ok(StoredMessage {
            id: row.try_get("id").map_err(storage)?,
            conversation_id: row.try_get("conversation_id").map_err(storage)?,
            message: Message {
                role: parse_role(row.try_get("role").map_err(storage)?)?,
                content,
                tool_call_id: row.try_get("tool_call_id").map_err(storage)?,
            },
            created_at: parse_timestamp(row.try_get("created_at").map_err(storage)?)?,
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_conversation(&self, title: &str, model: &str) -> Result<Conversation, StoreError> {
        let conversation = Conversation::new(title, model);
        sqlx::query(
            "INSERT INTO conversations (id, title, model, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&conversation.id)
        .bind(&conversation.title)
        .bind(&conversation.model)
        .bind(timestamp(conversation.created_at))
        .bind(timestamp(conversation.updated_at))
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        debug!(id = %conversation.id, "Created conversation");
        Ok(conversation)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let rows = sqlx::query("SELECT * FROM conversations ORDER BY updated_at DESC, rowid DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(Self::row_to_conversation).collect()
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(title)
            .bind(timestamp(Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<StoredMessage, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let touched = sqlx::query("UPDATE conversations SET updated_at = ?1 WHERE id = ?2")
            .bind(timestamp(now))
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        if touched.rows_affected() == 0 {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }

        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            message,
            created_at: now,
        };
        let content = serde_json::to_string(&stored.message.content).map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, tool_call_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&stored.id)
        .bind(conversation_id)
        .bind(stored.message.role.as_str())
        .bind(&content)
        .bind(&stored.message.tool_call_id)
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(stored)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        if self.get_conversation(conversation_id).await?.is_none() {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }
        let rows = sqlx::query("SELECT * FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC")
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter().map(Self::row_to_message).collect()
    }
}
