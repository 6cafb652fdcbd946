//! Model adapter trait: the abstraction over LLM streaming backends.
//!
//! An adapter takes a history, tool specs and a system prompt, and produces
//! a bounded stream of [`AgentEvent`]s that ends in exactly one `done` or
//! `error`. Transport failures never escape as `Err`; they are folded into
//! the terminal `error` event.
//!
//! Implementations: Anthropic (content-block protocol) and OpenAI-compatible
//! endpoints (delta-chunk protocol).

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::event::AgentEvent;
use crate::message::Message;

/// Capacity of the per-call event channel between an adapter and the loop.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Receiving half of an adapter or loop event stream.
pub type EventStream = mpsc::Receiver<AgentEvent>;

/// Which wire protocol family an adapter speaks.
///
/// The agent loop picks the working-history shape from this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Discrete block start/delta/stop events (Anthropic Messages API).
    ContentBlock,
    /// Incremental chunks keyed by tool-call index (OpenAI Chat Completions).
    DeltaChunk,
}

/// A tool description sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,

    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One model call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub system: String,
}

/// The core adapter trait.
///
/// `stream` spawns the network call and returns immediately. The producer
/// stops early when `cancel` fires or the receiver is dropped.
pub trait ModelAdapter: Send + Sync {
    /// Human-readable provider name (e.g., "anthropic", "groq").
    fn name(&self) -> &str;

    /// Model identifier sent upstream.
    fn model(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn stream(&self, request: ChatRequest, cancel: CancellationToken) -> EventStream;
}
