//! Normalized streaming events.
//!
//! `AgentEvent` is the only vocabulary shared by provider adapters, the agent
//! loop, and transports. Both provider wire protocols are reduced to it, and
//! the HTTP transport forwards it verbatim as SSE frames:
//!
//! - `iteration`:                the loop is starting model call `n`
//! - `text_delta`:               partial assistant text
//! - `tool_call`:                a finalized tool invocation request
//! - `tool_confirmation_needed`: the call is subject to the confirmation gate
//! - `tool_result`:              outcome of a tool invocation
//! - `done`:                     a model response finished normally
//! - `error`:                    the turn failed

use serde::{Deserialize, Serialize};

use crate::message::ToolCall;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    Iteration {
        n: u32,
    },

    TextDelta {
        text: String,
    },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolConfirmationNeeded {
        id: String,
        name: String,
        input: serde_json::Value,
        message: String,
    },

    ToolResult {
        tool_use_id: String,
        name: String,
        result: String,
    },

    Done {
        stop_reason: String,
    },

    Error {
        message: String,
    },
}

impl AgentEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self::ToolCall {
            id: call.id,
            name: call.name,
            input: call.input,
        }
    }

    pub fn done(stop_reason: impl Into<String>) -> Self {
        Self::Done {
            stop_reason: stop_reason.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Iteration { .. } => "iteration",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolConfirmationNeeded { .. } => "tool_confirmation_needed",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends an adapter stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
