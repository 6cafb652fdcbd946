//! Anthropic Messages API adapter (content-block protocol).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via SSE block start/delta/stop events
//!
//! Text deltas are forwarded as soon as they arrive. Tool input arrives as
//! `input_json_delta` fragments, buffered per block index and parsed when the
//! block stops.

use std::collections::BTreeMap;

use localforge_core::error::ProviderError;
use localforge_core::event::AgentEvent;
use localforge_core::message::ToolCall;
use localforge_core::provider::{ChatRequest, EventStream, ModelAdapter, ProviderKind};
use localforge_core::CancellationToken;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::projection::anthropic as wire;
use crate::sse::{self, StreamDecoder};
use crate::tool_input::parse_tool_input;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 8096;

/// Streaming adapter for Anthropic models.
#[derive(Clone)]
pub struct AnthropicAdapter {
    model: String,
    base_url: String,
    api_key: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            client: crate::http_client(),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Share an existing connection pool.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": wire::to_wire(&request.messages),
            "stream": true,
        });

        if !request.system.is_empty() {
            body["system"] = serde_json::json!(request.system);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(wire::tools_to_wire(&request.tools));
        }

        body
    }

    async fn open(&self, request: &ChatRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(
            provider = "anthropic",
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider = "anthropic", status, body = %body, "Anthropic API error");
            let message = crate::error_message(&body);
            return Err(if status == 429 {
                ProviderError::RateLimited(message)
            } else {
                ProviderError::ApiError {
                    status_code: status,
                    message,
                }
            });
        }

        Ok(response)
    }

    async fn run(self, request: ChatRequest, tx: mpsc::Sender<AgentEvent>) {
        match self.open(&request).await {
            Ok(response) => sse::pump(response, ContentBlockDecoder::default(), &tx).await,
            Err(e) => {
                let _ = tx.send(AgentEvent::error(e.to_string())).await;
            }
        }
    }
}

impl ModelAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::ContentBlock
    }

    fn stream(&self, request: ChatRequest, cancel: CancellationToken) -> EventStream {
        let this = self.clone();
        crate::spawn_stream("anthropic", cancel, move |tx| this.run(request, tx))
    }
}

/// A `tool_use` block whose input is still arriving.
#[derive(Debug)]
struct OpenToolUse {
    id: String,
    name: String,
    json: String,
}

/// State machine over Messages API stream events.
#[derive(Debug, Default)]
pub struct ContentBlockDecoder {
    open_tools: BTreeMap<u64, OpenToolUse>,
    stop_reason: Option<String>,
}

impl StreamDecoder for ContentBlockDecoder {
    fn decode(&mut self, data: &str) -> Vec<AgentEvent> {
        let event: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                return Vec::new();
            }
        };

        let index = event["index"].as_u64().unwrap_or(0);

        match event["type"].as_str().unwrap_or("") {
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.open_tools.insert(
                        index,
                        OpenToolUse {
                            id: block["id"].as_str().unwrap_or_default().to_string(),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            json: String::new(),
                        },
                    );
                }
                Vec::new()
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => match delta["text"].as_str() {
                        Some(text) if !text.is_empty() => vec![AgentEvent::text(text)],
                        _ => Vec::new(),
                    },
                    "input_json_delta" => {
                        if let (Some(open), Some(partial)) = (
                            self.open_tools.get_mut(&index),
                            delta["partial_json"].as_str(),
                        ) {
                            open.json.push_str(partial);
                        }
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }
            "content_block_stop" => match self.open_tools.remove(&index) {
                Some(open) => vec![AgentEvent::tool_call(ToolCall {
                    id: open.id,
                    name: open.name,
                    input: parse_tool_input(&open.json),
                })],
                None => Vec::new(),
            },
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                Vec::new()
            }
            "message_stop" => {
                let reason = self.stop_reason.take().unwrap_or_else(|| "end_turn".into());
                vec![AgentEvent::done(reason)]
            }
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown streaming error");
                vec![AgentEvent::error(format!("Anthropic error: {message}"))]
            }
            _ => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<AgentEvent> {
        let err = ProviderError::StreamInterrupted("connection closed before message_stop".into());
        vec![AgentEvent::error(err.to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localforge_core::message::Message;
    use localforge_core::provider::ToolSpec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn decode_all(decoder: &mut ContentBlockDecoder, events: &[Value]) -> Vec<AgentEvent> {
        events
            .iter()
            .flat_map(|e| decoder.decode(&e.to_string()))
            .collect()
    }

    fn tool_use_events(id: &str, fragments: &[&str]) -> Vec<Value> {
        let mut events = vec![json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": {"type": "tool_use", "id": id, "name": "list_directory", "input": {}}
        })];
        for f in fragments {
            events.push(json!({
                "type": "content_block_delta",
                "index": 1,
                "delta": {"type": "input_json_delta", "partial_json": f}
            }));
        }
        events.push(json!({"type": "content_block_stop", "index": 1}));
        events
    }

    fn sse_body(events: &[Value]) -> String {
        events
            .iter()
            .map(|e| format!("event: {}\ndata: {}\n\n", e["type"].as_str().unwrap(), e))
            .collect()
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![Message::user("list files in /tmp")],
            tools: vec![ToolSpec {
                name: "list_directory".into(),
                description: "List".into(),
                parameters: json!({"type": "object"}),
            }],
            system: "be helpful".into(),
        }
    }

    async fn collect(mut rx: EventStream) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[test]
    fn text_delta_passes_through_immediately() {
        let mut d = ContentBlockDecoder::default();
        let out = d.decode(
            &json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}})
                .to_string(),
        );
        assert_eq!(out, vec![AgentEvent::text("Hi")]);
    }

    #[test]
    fn tool_input_is_buffered_until_block_stop() {
        let mut d = ContentBlockDecoder::default();
        let events = tool_use_events("toolu_1", &[r#"{"pa"#, r#"th": "/t"#, r#"mp"}"#]);
        let (head, tail) = events.split_at(events.len() - 1);
        assert!(decode_all(&mut d, head).is_empty());
        let out = decode_all(&mut d, tail);
        assert_eq!(
            out,
            vec![AgentEvent::ToolCall {
                id: "toolu_1".into(),
                name: "list_directory".into(),
                input: json!({"path": "/tmp"}),
            }]
        );
    }

    #[test]
    fn empty_and_malformed_input_become_empty_object() {
        let mut d = ContentBlockDecoder::default();
        let out = decode_all(&mut d, &tool_use_events("a", &[]));
        assert!(matches!(&out[0], AgentEvent::ToolCall { input, .. } if *input == json!({})));

        let out = decode_all(&mut d, &tool_use_events("b", &[r#"{"path": "#]));
        assert!(matches!(&out[0], AgentEvent::ToolCall { input, .. } if *input == json!({})));
    }

    #[test]
    fn message_stop_reports_stop_reason() {
        let mut d = ContentBlockDecoder::default();
        let out = decode_all(
            &mut d,
            &[
                json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
                json!({"type": "message_stop"}),
            ],
        );
        assert_eq!(out, vec![AgentEvent::done("tool_use")]);
    }

    #[test]
    fn upstream_error_event_becomes_error() {
        let mut d = ContentBlockDecoder::default();
        let out = d.decode(
            &json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}})
                .to_string(),
        );
        assert_eq!(out, vec![AgentEvent::error("Anthropic error: Overloaded")]);
    }

    #[test]
    fn early_close_is_an_error() {
        let mut d = ContentBlockDecoder::default();
        let out = d.finish();
        assert!(matches!(&out[0], AgentEvent::Error { message } if message.contains("message_stop")));
    }

    #[test]
    fn request_body_shape() {
        let adapter = AnthropicAdapter::new("claude-sonnet-4-6", "sk-ant");
        let body = adapter.request_body(&request());
        assert_eq!(body["max_tokens"], 8096);
        assert_eq!(body["system"], "be helpful");
        assert_eq!(body["stream"], true);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][0]["content"], "list files in /tmp");

        let capped = AnthropicAdapter::new("claude-haiku-4-5", "sk-ant").with_max_tokens(1024);
        assert_eq!(capped.request_body(&request())["max_tokens"], 1024);
    }

    #[tokio::test]
    async fn streams_text_and_tool_call_from_server() {
        let server = MockServer::start().await;
        let mut events = vec![
            json!({"type": "message_start", "message": {"id": "msg_1"}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Looking"}}),
            json!({"type": "content_block_stop", "index": 0}),
        ];
        events.extend(tool_use_events("toolu_9", &[r#"{"path":"#, r#""/tmp"}"#]));
        events.push(json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}));
        events.push(json!({"type": "message_stop"}));

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(json!({"model": "claude-sonnet-4-6", "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(&events), "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new("claude-sonnet-4-6", "sk-ant").with_base_url(server.uri());
        let out = collect(adapter.stream(request(), CancellationToken::new())).await;

        assert_eq!(
            out,
            vec![
                AgentEvent::text("Looking"),
                AgentEvent::ToolCall {
                    id: "toolu_9".into(),
                    name: "list_directory".into(),
                    input: json!({"path": "/tmp"}),
                },
                AgentEvent::done("tool_use"),
            ]
        );
    }

    #[tokio::test]
    async fn unauthorized_is_invalid_key_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                json!({"type": "error", "error": {"type": "authentication_error", "message": "invalid x-api-key"}}),
            ))
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new("claude-sonnet-4-6", "bad").with_base_url(server.uri());
        let out = collect(adapter.stream(request(), CancellationToken::new())).await;
        assert_eq!(out, vec![AgentEvent::error("Invalid Anthropic API key")]);
    }

    #[tokio::test]
    async fn server_error_uses_upstream_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_json(
                json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
            ))
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new("m", "k").with_base_url(server.uri());
        let out = collect(adapter.stream(request(), CancellationToken::new())).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], AgentEvent::Error { message } if message.contains("Overloaded") && message.contains("529")));
    }

    #[tokio::test]
    async fn unreachable_host_is_connection_error() {
        let adapter = AnthropicAdapter::new("m", "k").with_base_url("http://127.0.0.1:1");
        let out = collect(adapter.stream(request(), CancellationToken::new())).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], AgentEvent::Error { message } if message.starts_with("Connection error:")));
    }

    #[tokio::test]
    async fn cancellation_closes_stream_without_events() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("", "text/event-stream")
                    .set_delay(std::time::Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let adapter = AnthropicAdapter::new("m", "k").with_base_url(server.uri());
        let cancel = CancellationToken::new();
        let rx = adapter.stream(request(), cancel.clone());
        cancel.cancel();
        let out = tokio::time::timeout(std::time::Duration::from_secs(5), collect(rx))
            .await
            .expect("stream should close promptly after cancel");
        assert!(out.is_empty());
    }
}
