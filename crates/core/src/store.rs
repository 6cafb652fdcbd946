//! Conversation store trait: the ordered message log behind every chat.
//!
//! Transports read the history for a turn from the store and append the
//! user message, assistant text and tool results through it. The agent loop
//! itself never touches the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::message::Message;

/// Conversation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,

    /// Empty until the first user message names it (or the user renames it).
    pub title: String,

    /// Model the conversation was started with.
    pub model: String,

    pub created_at: DateTime<Utc>,

    /// Bumped on every appended message.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            model: model.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A message as persisted in a conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    #[serde(flatten)]
    pub message: Message,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    async fn create_conversation(&self, title: &str, model: &str)
    -> Result<Conversation, StoreError>;

    /// All conversations, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Delete a conversation and its messages. Returns `false` if absent.
    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError>;

    async fn update_title(&self, id: &str, title: &str) -> Result<(), StoreError>;

    /// Append to the log. Fails with `NotFound` for an unknown conversation.
    async fn append_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<StoredMessage, StoreError>;

    /// The log in append order.
    async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;
}
