//! Model adapters for LocalForge.
//!
//! Every adapter implements `localforge_core::ModelAdapter` and turns one
//! provider's streaming protocol into normalized `AgentEvent`s. The router
//! builds the right adapter for a configured model.

pub mod anthropic;
pub mod openai_compat;
pub mod projection;
pub mod router;
pub mod sse;
pub mod tool_input;

use std::future::Future;
use std::time::Duration;

use localforge_core::event::AgentEvent;
use localforge_core::provider::{EVENT_CHANNEL_CAPACITY, EventStream};
use localforge_core::CancellationToken;
use tokio::sync::mpsc;
use tracing::debug;

pub use anthropic::AnthropicAdapter;
pub use openai_compat::OpenAiCompatAdapter;
pub use router::{ModelInfo, ModelRouter, available_models, build_adapter};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP client shared by the adapters' defaults.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Pull `error.message` out of a JSON error body, or fall back to the raw text.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Spawn an adapter's producer task on a bounded channel.
///
/// Cancellation drops the producer future, which aborts any in-flight HTTP
/// read; the receiver then sees the channel close with no further events.
pub(crate) fn spawn_stream<F, Fut>(provider: &str, cancel: CancellationToken, run: F) -> EventStream
where
    F: FnOnce(mpsc::Sender<AgentEvent>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let producer = run(tx);
    let provider = provider.to_string();

    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(provider = %provider, "Stream cancelled");
            }
            _ = producer => {}
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_nested_message() {
        assert_eq!(
            error_message(r#"{"error":{"type":"x","message":"bad model"}}"#),
            "bad model"
        );
        assert_eq!(error_message(r#"{"error":"flat"}"#), "flat");
        assert_eq!(error_message("plain text"), "plain text");
    }

    #[tokio::test]
    async fn spawn_stream_forwards_until_producer_returns() {
        let mut rx = spawn_stream("test", CancellationToken::new(), |tx| async move {
            let _ = tx.send(AgentEvent::text("a")).await;
            let _ = tx.send(AgentEvent::done("stop")).await;
        });
        assert_eq!(rx.recv().await, Some(AgentEvent::text("a")));
        assert_eq!(rx.recv().await, Some(AgentEvent::done("stop")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn spawn_stream_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let mut rx = spawn_stream("test", cancel.clone(), |tx| async move {
            let _ = tx.send(AgentEvent::text("first")).await;
            std::future::pending::<()>().await;
        });
        assert_eq!(rx.recv().await, Some(AgentEvent::text("first")));
        cancel.cancel();
        assert_eq!(rx.recv().await, None);
    }
}
