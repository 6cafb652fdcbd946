//! # LocalForge Core
//!
//! Domain types, traits, and error definitions for the LocalForge agent
//! orchestrator. This crate defines the shared vocabulary that all other
//! crates implement against:
//!
//! - [`AgentEvent`], the normalized streaming event model
//! - [`ModelAdapter`], the streaming interface over LLM backends
//! - [`Tool`] and [`ToolRegistry`], the capability contract
//! - [`ConversationStore`], the ordered message log

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ToolError};
pub use event::AgentEvent;
pub use message::{Content, ContentBlock, Message, Role, ToolCall};
pub use provider::{ChatRequest, EventStream, ModelAdapter, ProviderKind, ToolSpec};
pub use store::{Conversation, ConversationStore, StoredMessage};
pub use tool::{Tool, ToolRegistry};
pub use tokio_util::sync::CancellationToken;
