//! Per-iteration accumulation and the working-history shape for each
//! provider kind.

use localforge_core::event::AgentEvent;
use localforge_core::message::{Content, ContentBlock, Message, Role, ToolCall};
use localforge_core::provider::ProviderKind;

/// What one model call produced.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    text: String,
    calls: Vec<ToolCall>,
    stop_reason: Option<String>,
}

impl TurnAccumulator {
    pub fn observe(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::TextDelta { text } => self.text.push_str(text),
            AgentEvent::ToolCall { id, name, input } => self.calls.push(ToolCall {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            AgentEvent::Done { stop_reason } => self.stop_reason = Some(stop_reason.clone()),
            _ => {}
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// The assistant turn as it goes into working history.
    ///
    /// Content-block providers always get a block list (text block only when
    /// non-empty, then one `tool_use` per call). Delta-chunk providers get
    /// plain text when there are no calls.
    pub fn assistant_message(&self, kind: ProviderKind) -> Message {
        if kind == ProviderKind::DeltaChunk && self.calls.is_empty() {
            return Message::assistant(self.text.clone());
        }

        let mut blocks = Vec::with_capacity(self.calls.len() + 1);
        if !self.text.is_empty() {
            blocks.push(ContentBlock::text(self.text.clone()));
        }
        blocks.extend(self.calls.iter().map(ContentBlock::tool_use));
        Message::assistant(blocks)
    }

    pub fn into_calls(self) -> Vec<ToolCall> {
        self.calls
    }
}

/// A tool result message in the provider's shape.
pub fn tool_message(kind: ProviderKind, tool_use_id: &str, result: &str) -> Message {
    match kind {
        ProviderKind::ContentBlock => {
            Message::user(vec![ContentBlock::tool_result(tool_use_id, result)])
        }
        ProviderKind::DeltaChunk => Message::tool(tool_use_id, result),
    }
}

/// The call id a tool result message answers, in either shape.
pub(crate) fn answered_call_id(message: &Message) -> Option<&str> {
    match (&message.role, &message.content) {
        (Role::Tool, _) => message.tool_call_id.as_deref(),
        (Role::User, Content::Blocks(blocks)) => match blocks.as_slice() {
            [ContentBlock::ToolResult { tool_use_id, .. }] => Some(tool_use_id.as_str()),
            _ => None,
        },
        _ => None,
    }
}

/// Record a tool result, replacing an earlier result for the same call in the
/// current round so each `tool_use` keeps exactly one answer.
pub fn record_tool_result(history: &mut Vec<Message>, kind: ProviderKind, tool_use_id: &str, result: &str) {
    let message = tool_message(kind, tool_use_id, result);
    let existing = history
        .iter()
        .rev()
        .take_while(|m| m.role != Role::Assistant)
        .position(|m| answered_call_id(m) == Some(tool_use_id));

    match existing {
        Some(from_end) => {
            let index = history.len() - 1 - from_end;
            history[index] = message;
        }
        None => history.push(message),
    }
}
