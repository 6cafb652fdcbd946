//! Rebuilds the messages a turn added to history from its event stream.
//!
//! Transports use this to persist a finished turn (or to extend an
//! in-process history) without reaching into the loop's working copy.

use std::collections::HashSet;

use localforge_core::event::AgentEvent;
use localforge_core::message::{Message, Role};
use localforge_core::provider::ProviderKind;

use crate::loop_runner::PENDING_CONFIRMATION;
use crate::turn::{TurnAccumulator, record_tool_result};

/// Result recorded for a call whose turn ended (cancelled, failed or cut
/// off) before the tool produced an answer.
pub const INTERRUPTED_TOOL_RESULT: &str = "Tool error: the turn ended before this tool returned a result";

/// Collects one turn's assistant messages and tool results in the shape the
/// adapter's provider kind expects.
#[derive(Debug)]
pub struct Transcript {
    kind: ProviderKind,
    messages: Vec<Message>,
    current: TurnAccumulator,
    flushed: bool,
    answered: HashSet<String>,
}

impl Transcript {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            messages: Vec::new(),
            current: TurnAccumulator::default(),
            flushed: false,
            answered: HashSet::new(),
        }
    }

    pub fn observe(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::Iteration { .. } => {
                self.flush();
                self.flushed = false;
            }
            AgentEvent::TextDelta { .. } | AgentEvent::ToolCall { .. } | AgentEvent::Done { .. } => {
                self.current.observe(event)
            }
            AgentEvent::ToolResult {
                tool_use_id, result, ..
            } => {
                self.flush();
                record_tool_result(&mut self.messages, self.kind, tool_use_id, result);
                if result == PENDING_CONFIRMATION {
                    self.answered.remove(tool_use_id);
                } else {
                    self.answered.insert(tool_use_id.clone());
                }
            }
            AgentEvent::ToolConfirmationNeeded { .. } | AgentEvent::Error { .. } => {}
        }
    }

    /// True when the turn has produced no text, calls or results yet.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.current.text().is_empty() && self.current.calls().is_empty()
    }

    /// The messages the turn produced, in order.
    ///
    /// Every `tool_use` in the result has exactly one answer: calls left
    /// without a real result get [`INTERRUPTED_TOOL_RESULT`], so the history
    /// stays valid for the next request.
    pub fn into_messages(mut self) -> Vec<Message> {
        self.flush();
        self.close_unanswered_calls();
        self.messages
    }

    fn close_unanswered_calls(&mut self) {
        let Some(last) = self.messages.iter().rev().find(|m| m.role == Role::Assistant) else {
            return;
        };
        let unanswered: Vec<String> = last
            .tool_calls()
            .into_iter()
            .map(|call| call.id)
            .filter(|id| !self.answered.contains(id))
            .collect();

        for id in unanswered {
            record_tool_result(&mut self.messages, self.kind, &id, INTERRUPTED_TOOL_RESULT);
        }
    }

    fn flush(&mut self) {
        if self.flushed {
            return;
        }
        let turn = std::mem::take(&mut self.current);
        if !turn.text().is_empty() || !turn.calls().is_empty() {
            self.messages.push(turn.assistant_message(self.kind));
        }
        self.flushed = true;
    }
}
