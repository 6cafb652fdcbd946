//! In-memory store, useful for testing and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use localforge_core::error::StoreError;
use localforge_core::message::Message;
use localforge_core::store::{Conversation, ConversationStore, StoredMessage};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<StoredMessage>>,
}

/// Conversations held in process memory; lost on exit.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_conversation(&self, title: &str, model: &str) -> Result<Conversation, StoreError> {
        let conversation = Conversation::new(title, model);
        let mut state = self.state.write().await;
        state
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        state.messages.insert(conversation.id.clone(), Vec::new());
        Ok(conversation)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, StoreError> {
        let state = self.state.read().await;
        let mut all: Vec<Conversation> = state.conversations.values().cloned().collect();
        all.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(all)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        Ok(self.state.read().await.conversations.get(id).cloned())
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        state.messages.remove(id);
        Ok(state.conversations.remove(id).is_some())
    }

    async fn update_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        conversation.title = title.to_string();
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: Message,
    ) -> Result<StoredMessage, StoreError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let conversation = state
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        conversation.updated_at = now;

        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            message,
            created_at: now,
        };
        state
            .messages
            .entry(conversation_id.to_string())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let state = self.state.read().await;
        if !state.conversations.contains_key(conversation_id) {
            return Err(StoreError::NotFound(conversation_id.to_string()));
        }
        Ok(state.messages.get(conversation_id).cloned().unwrap_or_default())
    }
}
