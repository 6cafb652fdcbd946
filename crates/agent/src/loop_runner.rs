//! The agent reasoning loop implementation.

use std::sync::Arc;

use localforge_config::AppConfig;
use localforge_core::error::ToolError;
use localforge_core::event::AgentEvent;
use localforge_core::message::{Message, ToolCall};
use localforge_core::provider::{
    ChatRequest, EVENT_CHANNEL_CAPACITY, EventStream, ModelAdapter, ProviderKind, ToolSpec,
};
use localforge_core::tool::{Tool, ToolRegistry};
use localforge_core::CancellationToken;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::confirmation::{ConfirmationPolicy, confirmation_message};
use crate::turn::{TurnAccumulator, record_tool_result};

/// Provisional result recorded for a gated call before it runs.
pub const PENDING_CONFIRMATION: &str = "Waiting for user confirmation...";

const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// The core agent loop that orchestrates model calls and tool execution.
#[derive(Clone)]
pub struct AgentLoop {
    /// Tools offered on every turn
    tools: ToolRegistry,

    /// Which calls are announced before they run
    policy: ConfirmationPolicy,

    system_prompt: String,

    /// Upper bound on model calls per turn
    max_iterations: u32,
}

impl AgentLoop {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            tools,
            policy: ConfirmationPolicy::default(),
            system_prompt: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Settings for the prompt, ceiling and confirmation policy come from config.
    pub fn from_config(config: &AppConfig, tools: ToolRegistry) -> Self {
        Self::new(tools)
            .with_system_prompt(config.agent.system_prompt.clone())
            .with_max_iterations(config.agent.max_iterations)
            .with_confirmation_policy(ConfirmationPolicy::from_config(&config.tools))
    }

    /// Set the maximum number of model calls per turn (at least one).
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_confirmation_policy(mut self, policy: ConfirmationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run one user turn.
    ///
    /// Returns immediately; events arrive on the returned channel until the
    /// turn ends with the adapter's final `done`, a forwarded `error`, or the
    /// iteration-ceiling `error`. Cancelling `cancel` or dropping the receiver
    /// stops the turn and aborts any in-flight model call or tool.
    pub fn run(
        &self,
        history: Vec<Message>,
        adapter: Arc<dyn ModelAdapter>,
        extra_tools: Vec<Arc<dyn Tool>>,
        cancel: CancellationToken,
    ) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let tools = self.tools.layered(extra_tools);

        info!(
            provider = adapter.name(),
            model = adapter.model(),
            messages = history.len(),
            tools = tools.len(),
            "Starting agent turn"
        );

        let turn = Turn {
            specs: tools.specs(),
            tools,
            policy: self.policy.clone(),
            system_prompt: self.system_prompt.clone(),
            max_iterations: self.max_iterations,
            adapter,
            tx,
            cancel: cancel.clone(),
        };

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!("Agent turn cancelled"),
                outcome = turn.drive(history) => {
                    if outcome.is_err() {
                        debug!("Event receiver dropped, agent turn stopped");
                    }
                }
            }
        });

        rx
    }
}

/// The consumer went away; nothing more can be delivered.
struct ReceiverGone;

/// Aborts a spawned task when dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// State owned by one running turn.
struct Turn {
    tools: ToolRegistry,
    specs: Vec<ToolSpec>,
    policy: ConfirmationPolicy,
    system_prompt: String,
    max_iterations: u32,
    adapter: Arc<dyn ModelAdapter>,
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl Turn {
    async fn emit(&self, event: AgentEvent) -> Result<(), ReceiverGone> {
        self.tx.send(event).await.map_err(|_| ReceiverGone)
    }

    async fn drive(self, mut history: Vec<Message>) -> Result<(), ReceiverGone> {
        let kind = self.adapter.kind();

        for n in 1..=self.max_iterations {
            self.emit(AgentEvent::Iteration { n }).await?;
            debug!(iteration = n, provider = self.adapter.name(), "Calling model");

            let request = ChatRequest {
                messages: history.clone(),
                tools: self.specs.clone(),
                system: self.system_prompt.clone(),
            };
            let mut stream = self.adapter.stream(request, self.cancel.child_token());

            let mut acc = TurnAccumulator::default();
            while let Some(event) = stream.recv().await {
                acc.observe(&event);
                let failed = matches!(event, AgentEvent::Error { .. });
                let terminal = event.is_terminal();
                self.emit(event).await?;
                if failed {
                    warn!(iteration = n, "Model call failed, ending turn");
                    return Ok(());
                }
                if terminal {
                    break;
                }
            }

            history.push(acc.assistant_message(kind));
            debug!(
                iteration = n,
                stop_reason = acc.stop_reason().unwrap_or("none"),
                tool_calls = acc.calls().len(),
                "Model call finished"
            );

            let calls = acc.into_calls();
            if calls.is_empty() {
                return Ok(());
            }

            for call in &calls {
                self.resolve(call, kind, &mut history).await?;
            }
        }

        warn!(max_iterations = self.max_iterations, "Max iterations reached");
        self.emit(AgentEvent::error(format!(
            "Max iterations ({}) reached",
            self.max_iterations
        )))
        .await
    }

    /// Gate, execute and record one tool call.
    async fn resolve(
        &self,
        call: &ToolCall,
        kind: ProviderKind,
        history: &mut Vec<Message>,
    ) -> Result<(), ReceiverGone> {
        let result = match self.tools.get(&call.name) {
            None => {
                warn!(tool = %call.name, "Model requested unknown tool");
                format!("Error: {}", ToolError::NotFound(call.name.clone()))
            }
            Some(tool) => {
                if self.policy.requires_confirmation(&call.name, &call.input) {
                    self.emit(AgentEvent::ToolConfirmationNeeded {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.input.clone(),
                        message: confirmation_message(&call.name, &call.input),
                    })
                    .await?;
                    self.emit(tool_result(call, PENDING_CONFIRMATION)).await?;
                    record_tool_result(history, kind, &call.id, PENDING_CONFIRMATION);
                }
                execute(tool, call).await
            }
        };

        self.emit(tool_result(call, &result)).await?;
        record_tool_result(history, kind, &call.id, &result);
        Ok(())
    }
}

fn tool_result(call: &ToolCall, result: &str) -> AgentEvent {
    AgentEvent::ToolResult {
        tool_use_id: call.id.clone(),
        name: call.name.clone(),
        result: result.to_string(),
    }
}

/// Run a tool in its own task so a panic becomes a tool error instead of
/// taking the turn down with it.
async fn execute(tool: Arc<dyn Tool>, call: &ToolCall) -> String {
    debug!(tool = %call.name, id = %call.id, "Executing tool");
    let input = call.input.clone();
    let mut handle = tokio::spawn(async move { tool.execute(input).await });
    let _abort = AbortOnDrop(handle.abort_handle());

    let outcome = match (&mut handle).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(ToolError::execution(&call.name, "tool panicked")),
        Err(e) => Err(ToolError::execution(&call.name, e)),
    };

    match outcome {
        Ok(output) => output,
        Err(ToolError::PermissionDenied { reason, .. }) => {
            warn!(tool = %call.name, reason = %reason, "Tool permission denied");
            format!("Permission denied: {reason}")
        }
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Tool execution failed");
            format!("Tool error: {e}")
        }
    }
}
