//! OpenAI-compatible adapter (delta-chunk protocol).
//!
//! Works with: OpenAI, Groq, OpenRouter, Together AI, Mistral, DeepSeek,
//! Ollama, vLLM, and any endpoint exposing `/chat/completions` with SSE.
//!
//! Tool-call deltas arrive keyed by array index: the first delta for an
//! index usually carries the id and name, later ones only append argument
//! text. Entries are finalized when a `finish_reason` arrives.

use std::collections::BTreeMap;

use localforge_core::error::ProviderError;
use localforge_core::event::AgentEvent;
use localforge_core::message::ToolCall;
use localforge_core::provider::{ChatRequest, EventStream, ModelAdapter, ProviderKind};
use localforge_core::CancellationToken;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::projection::openai as wire;
use crate::sse::{self, StreamDecoder};
use crate::tool_input::parse_tool_input;

/// Marker in an upstream rejection meaning the model cannot take tools.
const TOOLS_UNSUPPORTED_MARKER: &str = "does not support tools";

/// Streaming adapter for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiCompatAdapter {
    name: String,
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: crate::http_client(),
        }
    }

    /// Local Ollama server (no real key needed).
    pub fn ollama(model: impl Into<String>, base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            model,
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama",
        )
    }

    /// Share an existing connection pool.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, request: &ChatRequest, with_tools: bool) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": wire::to_wire(&request.system, &request.messages),
            "stream": true,
        });

        if with_tools && !request.tools.is_empty() {
            body["tools"] = serde_json::json!(wire::tools_to_wire(&request.tools));
        }

        body
    }

    /// Open the stream, retrying once without tools if the model refuses them.
    async fn open(&self, request: &ChatRequest) -> Result<reqwest::Response, ProviderError> {
        match self.send(request, true).await {
            Err(ProviderError::ToolsUnsupported(reason)) => {
                warn!(
                    provider = %self.name,
                    model = %self.model,
                    reason = %reason,
                    "Model rejected tool definitions, retrying without tools"
                );
                self.send(request, false).await
            }
            other => other,
        }
    }

    async fn send(
        &self,
        request: &ChatRequest,
        with_tools: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(
            provider = %self.name,
            model = %self.model,
            messages = request.messages.len(),
            with_tools,
            "Sending streaming request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&self.request_body(request, with_tools))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(format!(
                "Invalid API key for {}",
                self.name
            )));
        }
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %body, "Provider streaming error");
            let message = crate::error_message(&body);

            if with_tools
                && !request.tools.is_empty()
                && body.to_lowercase().contains(TOOLS_UNSUPPORTED_MARKER)
            {
                return Err(ProviderError::ToolsUnsupported(message));
            }
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
            Ok(response) => sse::pump(response, DeltaChunkDecoder::default(), &tx).await,
            Err(e) => {
                let _ = tx.send(AgentEvent::error(e.to_string())).await;
            }
        }
    }
}

impl ModelAdapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::DeltaChunk
    }

    fn stream(&self, request: ChatRequest, cancel: CancellationToken) -> EventStream {
        let this = self.clone();
        let name = self.name.clone();
        crate::spawn_stream(&name, cancel, move |tx| this.run(request, tx))
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    /// Set when the backend reports a failure in-band after a 200.
    #[serde(default)]
    error: Option<Value>,
}

/// Message of an in-band `error` payload, which is either an object with a
/// `message` or a bare string.
fn upstream_error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        other => other["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Upstream error: {other}")),
    }
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn apply(&mut self, delta: &StreamToolCallDelta) {
        if self.id.is_empty()
            && let Some(id) = delta.id.as_deref()
        {
            self.id = id.to_string();
        }
        if let Some(function) = &delta.function {
            if self.name.is_empty()
                && let Some(name) = function.name.as_deref()
            {
                self.name = name.to_string();
            }
            if let Some(args) = function.arguments.as_deref() {
                self.arguments.push_str(args);
            }
        }
    }

    fn into_event(self) -> AgentEvent {
        AgentEvent::tool_call(ToolCall {
            id: self.id,
            name: self.name,
            input: parse_tool_input(&self.arguments),
        })
    }
}

/// State machine over Chat Completions stream chunks.
#[derive(Debug, Default)]
pub struct DeltaChunkDecoder {
    calls: BTreeMap<u32, ToolCallAccumulator>,
}

impl DeltaChunkDecoder {
    /// Emit accumulated calls in index order and clear the map.
    fn flush(&mut self, named_only: bool) -> Vec<AgentEvent> {
        std::mem::take(&mut self.calls)
            .into_values()
            .filter(|acc| !named_only || !acc.name.is_empty())
            .map(ToolCallAccumulator::into_event)
            .collect()
    }

    fn finish_with(&mut self, reason: &str) -> Vec<AgentEvent> {
        let is_tool_intent = reason == "tool_calls" || reason == "function_call";
        let mut events = self.flush(!is_tool_intent);
        events.push(AgentEvent::done(reason));
        events
    }
}

impl StreamDecoder for DeltaChunkDecoder {
    fn decode(&mut self, data: &str) -> Vec<AgentEvent> {
        if data.trim() == "[DONE]" {
            return self.finish();
        }

        let chunk: StreamResponse = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable SSE chunk");
                return Vec::new();
            }
        };
        if let Some(error) = &chunk.error {
            let message = upstream_error_message(error);
            warn!(message = %message, "Upstream reported an error mid-stream");
            return vec![AgentEvent::error(message)];
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(AgentEvent::text(text));
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                self.calls.entry(delta.index).or_default().apply(&delta);
            }
            if let Some(reason) = choice.finish_reason {
                events.extend(self.finish_with(&reason));
                return events;
            }
        }
        events
    }

    fn finish(&mut self) -> Vec<AgentEvent> {
        self.finish_with("stop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localforge_core::message::Message;
    use localforge_core::provider::ToolSpec;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chunk(delta: Value, finish: Option<&str>) -> String {
        json!({"choices": [{"index": 0, "delta": delta, "finish_reason": finish}]}).to_string()
    }

    fn tool_delta(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> String {
        let mut call = json!({"index": index, "function": {"arguments": args}});
        if let Some(id) = id {
            call["id"] = json!(id);
            call["type"] = json!("function");
        }
        if let Some(name) = name {
            call["function"]["name"] = json!(name);
        }
        chunk(json!({"tool_calls": [call]}), None)
    }

    fn decode_all(decoder: &mut DeltaChunkDecoder, chunks: &[String]) -> Vec<AgentEvent> {
        chunks.iter().flat_map(|c| decoder.decode(c)).collect()
    }

    fn sse_body(chunks: &[String]) -> String {
        let mut body: String = chunks.iter().map(|c| format!("data: {c}\n\n")).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![Message::user("hello")],
            tools: vec![ToolSpec {
                name: "read_file".into(),
                description: "Read".into(),
                parameters: json!({"type": "object"}),
            }],
            system: "sys".into(),
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
    fn text_content_emitted_immediately() {
        let mut d = DeltaChunkDecoder::default();
        assert_eq!(
            d.decode(&chunk(json!({"content": "Hel"}), None)),
            vec![AgentEvent::text("Hel")]
        );
        assert!(d.decode(&chunk(json!({"role": "assistant", "content": ""}), None)).is_empty());
    }

    #[test]
    fn interleaved_indices_accumulate_separately() {
        let mut d = DeltaChunkDecoder::default();
        let out = decode_all(
            &mut d,
            &[
                tool_delta(0, Some("call_a"), Some("read_file"), ""),
                tool_delta(1, Some("call_b"), Some("list_directory"), "{\"path\":"),
                tool_delta(0, None, None, "{\"path\":\"a.txt\"}"),
                tool_delta(1, None, None, "\"/tmp\"}"),
                chunk(json!({}), Some("tool_calls")),
            ],
        );
        assert_eq!(
            out,
            vec![
                AgentEvent::ToolCall {
                    id: "call_a".into(),
                    name: "read_file".into(),
                    input: json!({"path": "a.txt"}),
                },
                AgentEvent::ToolCall {
                    id: "call_b".into(),
                    name: "list_directory".into(),
                    input: json!({"path": "/tmp"}),
                },
                AgentEvent::done("tool_calls"),
            ]
        );
    }

    #[test]
    fn later_deltas_do_not_overwrite_id_or_name() {
        let mut d = DeltaChunkDecoder::default();
        let out = decode_all(
            &mut d,
            &[
                tool_delta(0, Some("call_1"), Some("read_file"), "{}"),
                tool_delta(0, Some("call_other"), Some("other"), ""),
                chunk(json!({}), Some("tool_calls")),
            ],
        );
        assert!(matches!(&out[0], AgentEvent::ToolCall { id, name, .. } if id == "call_1" && name == "read_file"));
    }

    #[test]
    fn stop_flushes_only_named_entries() {
        let mut d = DeltaChunkDecoder::default();
        let out = decode_all(
            &mut d,
            &[
                tool_delta(0, Some("call_1"), Some("read_file"), "{\"path\":\"x\"}"),
                tool_delta(1, Some("call_2"), None, "{}"),
                chunk(json!({}), Some("stop")),
            ],
        );
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], AgentEvent::ToolCall { id, .. } if id == "call_1"));
        assert_eq!(out[1], AgentEvent::done("stop"));
    }

    #[test]
    fn length_finish_reason_is_reported() {
        let mut d = DeltaChunkDecoder::default();
        let out = d.decode(&chunk(json!({"content": "trunc"}), Some("length")));
        assert_eq!(out, vec![AgentEvent::text("trunc"), AgentEvent::done("length")]);
    }

    #[test]
    fn missing_finish_marker_synthesizes_stop() {
        let mut d = DeltaChunkDecoder::default();
        assert!(d.decode(&tool_delta(0, Some("c"), Some("read_file"), "{")).is_empty());
        let out = d.finish();
        assert!(matches!(&out[0], AgentEvent::ToolCall { input, .. } if *input == json!({})));
        assert_eq!(out[1], AgentEvent::done("stop"));
    }

    #[test]
    fn done_sentinel_ends_stream() {
        let mut d = DeltaChunkDecoder::default();
        assert_eq!(d.decode("[DONE]"), vec![AgentEvent::done("stop")]);
    }

    #[test]
    fn in_band_error_payload() {
        let mut d = DeltaChunkDecoder::default();
        let out = d.decode(r#"{"error":{"message":"model overloaded"}}"#);
        assert_eq!(out, vec![AgentEvent::error("model overloaded")]);
        assert_eq!(
            d.decode(r#"{"error":"rate limit exceeded"}"#),
            vec![AgentEvent::error("rate limit exceeded")]
        );
        assert_eq!(
            d.decode(r#"{"choices":[{"delta":{"content":"ok"}}],"error":null}"#),
            vec![AgentEvent::text("ok")]
        );
    }

    #[tokio::test]
    async fn error_after_200_ends_turn_with_error() {
        let server = MockServer::start().await;
        let chunks = vec![
            chunk(json!({"content": "Let me"}), None),
            json!({"error": {"message": "model overloaded", "type": "server_error"}}).to_string(),
        ];
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(&chunks), "text/event-stream"))
            .mount(&server)
            .await;

        let adapter = OpenAiCompatAdapter::new("openrouter", "some/model", server.uri(), "k");
        let out = collect(adapter.stream(request(), CancellationToken::new())).await;
        assert_eq!(
            out,
            vec![AgentEvent::text("Let me"), AgentEvent::error("model overloaded")]
        );
    }

    #[test]
    fn request_body_prepends_system_and_wraps_tools() {
        let adapter = OpenAiCompatAdapter::new("groq", "llama", "http://x/v1/", "k");
        assert_eq!(adapter.base_url(), "http://x/v1");
        let body = adapter.request_body(&request(), true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "sys");
        assert_eq!(body["tools"][0]["function"]["name"], "read_file");
        assert!(adapter.request_body(&request(), false).get("tools").is_none());
    }

    #[tokio::test]
    async fn streams_tool_call_from_server() {
        let server = MockServer::start().await;
        let chunks = vec![
            chunk(json!({"role": "assistant", "content": "Sure."}), None),
            tool_delta(0, Some("call_1"), Some("read_file"), "{\"path\""),
            tool_delta(0, None, None, ":\"notes.md\"}"),
            chunk(json!({}), Some("tool_calls")),
        ];
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(&chunks), "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = OpenAiCompatAdapter::new("openai", "gpt-4o", format!("{}/v1", server.uri()), "sk-test");
        let out = collect(adapter.stream(request(), CancellationToken::new())).await;
        assert_eq!(
            out,
            vec![
                AgentEvent::text("Sure."),
                AgentEvent::ToolCall {
                    id: "call_1".into(),
                    name: "read_file".into(),
                    input: json!({"path": "notes.md"}),
                },
                AgentEvent::done("tool_calls"),
            ]
        );
    }

    #[tokio::test]
    async fn retries_once_without_tools_when_unsupported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"error": {"message": "registry.ollama.ai/library/gemma does not support tools"}}),
            ))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse_body(&[chunk(json!({"content": "plain answer"}), Some("stop"))]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let adapter = OpenAiCompatAdapter::ollama("gemma", Some(&server.uri()));
        let out = collect(adapter.stream(request(), CancellationToken::new())).await;
        assert_eq!(out, vec![AgentEvent::text("plain answer"), AgentEvent::done("stop")]);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert!(first.get("tools").is_some());
        assert!(second.get("tools").is_none());
    }

    #[tokio::test]
    async fn other_rejection_is_fatal_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(
                json!({"error": {"message": "model 'nope' not found"}}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = OpenAiCompatAdapter::new("openai", "nope", server.uri(), "k");
        let out = collect(adapter.stream(request(), CancellationToken::new())).await;
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], AgentEvent::Error { message } if message.contains("not found")));
    }

    #[tokio::test]
    async fn unauthorized_names_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let adapter = OpenAiCompatAdapter::new("groq", "llama", server.uri(), "bad");
        let out = collect(adapter.stream(request(), CancellationToken::new())).await;
        assert_eq!(out, vec![AgentEvent::error("Invalid API key for groq")]);
    }

    #[tokio::test]
    async fn stream_without_finish_marker_ends_with_stop() {
        let server = MockServer::start().await;
        let body = format!("data: {}\n\n", chunk(json!({"content": "partial"}), None));
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let adapter = OpenAiCompatAdapter::new("openai", "gpt-4o", server.uri(), "k");
        let out = collect(adapter.stream(request(), CancellationToken::new())).await;
        assert_eq!(out, vec![AgentEvent::text("partial"), AgentEvent::done("stop")]);
    }
}
