//! Deterministic model adapter for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use localforge_core::event::AgentEvent;
use localforge_core::message::ToolCall;
use localforge_core::provider::{
    ChatRequest, EVENT_CHANNEL_CAPACITY, EventStream, ModelAdapter, ProviderKind,
};
use localforge_core::CancellationToken;
use serde_json::Value;
use tokio::sync::mpsc;

/// Plays back one scripted event list per `stream` call.
///
/// Once the script runs out, the last entry repeats when built with
/// [`ScriptedAdapter::repeating`]; otherwise an `error` event is returned.
/// Every request is recorded for inspection.
pub struct ScriptedAdapter {
    kind: ProviderKind,
    scripts: Mutex<VecDeque<Vec<AgentEvent>>>,
    repeat_last: bool,
    last: Mutex<Option<Vec<AgentEvent>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedAdapter {
    pub fn new(kind: ProviderKind, scripts: Vec<Vec<AgentEvent>>) -> Self {
        Self {
            kind,
            scripts: Mutex::new(scripts.into()),
            repeat_last: false,
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same events.
    pub fn repeating(kind: ProviderKind, events: Vec<AgentEvent>) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(kind, vec![events])
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn next_script(&self) -> Vec<AgentEvent> {
        let next = self.scripts.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(events) => {
                if self.repeat_last
                    && let Ok(mut last) = self.last.lock()
                {
                    *last = Some(events.clone());
                }
                events
            }
            None => self
                .last
                .lock()
                .ok()
                .and_then(|l| l.clone())
                .unwrap_or_else(|| vec![AgentEvent::error("scripted adapter has no more responses")]),
        }
    }
}

impl ModelAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn stream(&self, request: ChatRequest, cancel: CancellationToken) -> EventStream {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let events = self.next_script();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for event in events {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        rx
    }
}

/// Events for a plain text answer.
pub fn answer(text: &str) -> Vec<AgentEvent> {
    vec![AgentEvent::text(text), AgentEvent::done("end_turn")]
}

/// Events for a response that requests the given tool calls.
pub fn tool_calls(calls: &[(&str, &str, Value)]) -> Vec<AgentEvent> {
    let mut events: Vec<AgentEvent> = calls
        .iter()
        .map(|(id, name, input)| {
            AgentEvent::tool_call(ToolCall {
                id: (*id).into(),
                name: (*name).into(),
                input: input.clone(),
            })
        })
        .collect();
    events.push(AgentEvent::done("tool_use"));
    events
}
