//! REST and SSE handlers.
//!
//! Endpoints:
//!
//! - `GET    /api/health`                   Liveness and version
//! - `GET    /api/models`                   Configured models and key status
//! - `GET    /api/config`                   Configuration without secrets
//! - `GET    /api/conversations`            List conversations
//! - `POST   /api/conversations`            Create a conversation
//! - `GET    /api/conversations/{id}`       A conversation with its messages
//! - `PATCH  /api/conversations/{id}`       Rename
//! - `DELETE /api/conversations/{id}`       Delete with its messages
//! - `POST   /api/conversations/{id}/chat`  Run one turn, streamed as SSE

use std::convert::Infallible;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use localforge_agent::Transcript;
use localforge_config::{AgentSettings, ToolsConfig};
use localforge_core::error::{ProviderError, StoreError};
use localforge_core::message::Message;
use localforge_core::provider::{EVENT_CHANNEL_CAPACITY, EventStream, ProviderKind};
use localforge_core::store::{Conversation, ConversationStore, StoredMessage};
use localforge_core::CancellationToken;
use localforge_providers::ModelInfo;

use crate::SharedContext;

/// Length of a title derived from the first user message.
const AUTO_TITLE_CHARS: usize = 60;

pub(crate) fn routes() -> Router<SharedContext> {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/models", get(models_handler))
        .route("/api/config", get(config_handler))
        .route(
            "/api/conversations",
            get(list_conversations_handler).post(create_conversation_handler),
        )
        .route(
            "/api/conversations/{id}",
            get(get_conversation_handler)
                .patch(rename_conversation_handler)
                .delete(delete_conversation_handler),
        )
        .route("/api/conversations/{id}/chat", post(chat_handler))
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub content: String,

    /// Overrides the conversation's model for this turn.
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    store: String,
}

#[derive(Serialize)]
struct ModelListResponse {
    models: Vec<ModelInfo>,
    default_model: String,
}

#[derive(Serialize)]
struct ConfigResponse {
    default_model: String,
    models: Vec<ModelInfo>,
    agent: AgentSettings,
    tools: ToolsConfig,
}

#[derive(Serialize)]
struct ConversationListResponse {
    conversations: Vec<Conversation>,
}

#[derive(Serialize)]
struct ConversationDetailResponse {
    #[serde(flatten)]
    conversation: Conversation,
    messages: Vec<StoredMessage>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn not_found(id: &str) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        format!("Conversation not found: {id}"),
    )
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(id) => not_found(&id),
        other => {
            warn!(error = %other, "Conversation store failure");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn provider_error(e: ProviderError) -> ApiError {
    let status = match e {
        ProviderError::ModelNotFound(_) | ProviderError::NotConfigured(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    api_error(status, e.to_string())
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler(State(ctx): State<SharedContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store: ctx.store.name().to_string(),
    })
}

async fn models_handler(State(ctx): State<SharedContext>) -> Json<ModelListResponse> {
    Json(ModelListResponse {
        models: ctx.models.models(),
        default_model: ctx.models.default_model().to_string(),
    })
}

async fn config_handler(State(ctx): State<SharedContext>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        default_model: ctx.config.default_model.clone(),
        models: ctx.models.models(),
        agent: ctx.config.agent.clone(),
        tools: ctx.config.tools.clone(),
    })
}

async fn list_conversations_handler(
    State(ctx): State<SharedContext>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let conversations = ctx.store.list_conversations().await.map_err(store_error)?;
    Ok(Json(ConversationListResponse { conversations }))
}

async fn create_conversation_handler(
    State(ctx): State<SharedContext>,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let model = match payload.model.filter(|m| !m.is_empty()) {
        Some(model) if ctx.config.get_model(&model).is_none() => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("Unknown model: {model}"),
            ));
        }
        Some(model) => model,
        None => ctx.config.default_model.clone(),
    };
    let title = payload.title.unwrap_or_default();

    let conversation = ctx
        .store
        .create_conversation(title.trim(), &model)
        .await
        .map_err(store_error)?;
    info!(conversation = %conversation.id, model = %model, "Conversation created");
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_conversation_handler(
    State(ctx): State<SharedContext>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetailResponse>, ApiError> {
    let conversation = ctx
        .store
        .get_conversation(&id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found(&id))?;
    let messages = ctx.store.messages(&id).await.map_err(store_error)?;
    Ok(Json(ConversationDetailResponse {
        conversation,
        messages,
    }))
}

async fn rename_conversation_handler(
    State(ctx): State<SharedContext>,
    Path(id): Path<String>,
    Json(payload): Json<RenameRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "title required"));
    }
    ctx.store.update_title(&id, title).await.map_err(store_error)?;
    ctx.store
        .get_conversation(&id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

async fn delete_conversation_handler(
    State(ctx): State<SharedContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if ctx.store.delete_conversation(&id).await.map_err(store_error)? {
        info!(conversation = %id, "Conversation deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&id))
    }
}

/// `POST /api/conversations/{id}/chat`: persist the user message, run one
/// turn and stream its events. Each SSE frame is `event: <type>` with the
/// event's JSON as `data`.
async fn chat_handler(
    State(ctx): State<SharedContext>,
    Path(id): Path<String>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if payload.content.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "content must not be empty"));
    }

    let conversation = ctx
        .store
        .get_conversation(&id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| not_found(&id))?;

    let model = payload
        .model
        .as_deref()
        .filter(|m| !m.is_empty())
        .or(Some(conversation.model.as_str()).filter(|m| !m.is_empty()));
    let adapter = ctx.adapter(model).map_err(provider_error)?;

    ctx.store
        .append_message(&id, Message::user(payload.content.as_str()))
        .await
        .map_err(store_error)?;
    if conversation.title.is_empty() {
        ctx.store
            .update_title(&id, &auto_title(&payload.content))
            .await
            .map_err(store_error)?;
    }

    let history: Vec<Message> = ctx
        .store
        .messages(&id)
        .await
        .map_err(store_error)?
        .into_iter()
        .map(|m| m.message)
        .collect();

    info!(
        conversation = %id,
        model = adapter.model(),
        messages = history.len(),
        "Chat turn started"
    );

    let cancel = ctx.shutdown.child_token();
    let kind = adapter.kind();
    let events = ctx.agent.run(history, adapter, Vec::new(), cancel.clone());
    let rx = forward_and_persist(ctx.store.clone(), id, kind, events, cancel);

    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event.event_type()).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Relay loop events to the client and, once the turn ends, append what it
/// produced to the conversation log. The returned stream closes only after
/// the log is written. A client that goes away cancels the turn.
fn forward_and_persist(
    store: std::sync::Arc<dyn ConversationStore>,
    conversation_id: String,
    kind: ProviderKind,
    mut events: EventStream,
    cancel: CancellationToken,
) -> EventStream {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let mut transcript = Transcript::new(kind);
        let mut client_gone = false;

        while let Some(event) = events.recv().await {
            transcript.observe(&event);
            if !client_gone && tx.send(event).await.is_err() {
                debug!(conversation = %conversation_id, "Client disconnected, cancelling turn");
                client_gone = true;
                cancel.cancel();
            }
        }

        for message in transcript.into_messages() {
            if let Err(e) = store.append_message(&conversation_id, message).await {
                warn!(conversation = %conversation_id, error = %e, "Failed to persist turn");
                break;
            }
        }
        drop(tx);
    });

    rx
}

/// A conversation title from the opening message.
fn auto_title(content: &str) -> String {
    let single_line = content.split_whitespace().collect::<Vec<_>>().join(" ");
    single_line.chars().take(AUTO_TITLE_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ServerContext, build_router};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use localforge_agent::AgentLoop;
    use localforge_agent::testing::{ScriptedAdapter, answer, tool_calls};
    use localforge_config::AppConfig;
    use localforge_core::event::AgentEvent;
    use localforge_core::message::Role;
    use localforge_core::provider::ModelAdapter;
    use localforge_core::tool::{Tool, ToolRegistry};
    use localforge_memory::InMemoryStore;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the input text"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(
            &self,
            input: Value,
        ) -> Result<String, localforge_core::error::ToolError> {
            Ok(input["text"].as_str().unwrap_or_default().to_string())
        }
    }

    fn scripted_context(adapter: Arc<ScriptedAdapter>) -> SharedContext {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let ctx = ServerContext::new(AppConfig::default(), Arc::new(InMemoryStore::new()))
            .with_agent(AgentLoop::new(tools))
            .with_adapter_factory(move |_| Ok(adapter.clone() as Arc<dyn ModelAdapter>));
        Arc::new(ctx)
    }

    fn text_context(text: &str) -> SharedContext {
        scripted_context(Arc::new(ScriptedAdapter::repeating(
            ProviderKind::ContentBlock,
            answer(text),
        )))
    }

    async fn send(ctx: &SharedContext, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = build_router(ctx.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn create(ctx: &SharedContext) -> Conversation {
        let (status, body) = send(ctx, "POST", "/api/conversations", Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_slice(&body).unwrap()
    }

    /// Parse an SSE body into `(event, data)` pairs.
    fn frames(body: &[u8]) -> Vec<(String, Value)> {
        let text = String::from_utf8_lossy(body);
        text.split("\n\n")
            .filter_map(|frame| {
                let mut event = None;
                let mut data = None;
                for line in frame.lines() {
                    if let Some(e) = line.strip_prefix("event:") {
                        event = Some(e.trim().to_string());
                    } else if let Some(d) = line.strip_prefix("data:") {
                        data = serde_json::from_str(d.trim()).ok();
                    }
                }
                Some((event?, data?))
            })
            .collect()
    }

    #[tokio::test]
    async fn health_reports_store() {
        let ctx = text_context("hi");
        let (status, body) = send(&ctx, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["store"], "in_memory");
    }

    #[tokio::test]
    async fn models_lists_configured_models() {
        let ctx = text_context("hi");
        let (status, body) = send(&ctx, "GET", "/api/models", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["default_model"], "claude-sonnet-4-6");
        let models = json["models"].as_array().unwrap();
        assert!(models.iter().any(|m| m["provider"] == "ollama" && m["has_key"] == true));
    }

    #[tokio::test]
    async fn config_view_has_no_secrets() {
        let ctx = text_context("hi");
        let (status, body) = send(&ctx, "GET", "/api/config", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["agent"]["max_iterations"], 20);
        assert!(json.get("server").is_none());
    }

    #[tokio::test]
    async fn conversation_crud() {
        let ctx = text_context("hi");
        let conv = create(&ctx).await;
        assert_eq!(conv.model, "claude-sonnet-4-6");
        assert!(conv.title.is_empty());

        let (status, body) = send(&ctx, "GET", "/api/conversations", None).await;
        assert_eq!(status, StatusCode::OK);
        let list: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(list["conversations"].as_array().unwrap().len(), 1);

        let uri = format!("/api/conversations/{}", conv.id);
        let (status, body) = send(&ctx, "PATCH", &uri, Some(json!({"title": "Renamed"}))).await;
        assert_eq!(status, StatusCode::OK);
        let renamed: Conversation = serde_json::from_slice(&body).unwrap();
        assert_eq!(renamed.title, "Renamed");

        let (status, body) = send(&ctx, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let detail: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(detail["title"], "Renamed");
        assert_eq!(detail["messages"].as_array().unwrap().len(), 0);

        let (status, _) = send(&ctx, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&ctx, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&ctx, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_rejects_unknown_model() {
        let ctx = text_context("hi");
        let (status, body) = send(
            &ctx,
            "POST",
            "/api/conversations",
            Some(json!({"model": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("Unknown model"));
    }

    #[tokio::test]
    async fn rename_requires_title() {
        let ctx = text_context("hi");
        let conv = create(&ctx).await;
        let uri = format!("/api/conversations/{}", conv.id);
        let (status, _) = send(&ctx, "PATCH", &uri, Some(json!({"title": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_streams_events_and_persists_turn() {
        let ctx = text_context("Hello from the model");
        let conv = create(&ctx).await;

        let uri = format!("/api/conversations/{}/chat", conv.id);
        let (status, body) = send(&ctx, "POST", &uri, Some(json!({"content": "Say hello"}))).await;
        assert_eq!(status, StatusCode::OK);

        let frames = frames(&body);
        let kinds: Vec<&str> = frames.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(kinds, vec!["iteration", "text_delta", "done"]);
        assert_eq!(frames[1].1["type"], "text_delta");
        assert_eq!(frames[1].1["data"]["text"], "Hello from the model");

        let messages = ctx.store.messages(&conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message, Message::user("Say hello"));
        assert_eq!(messages[1].message.role, Role::Assistant);
        assert_eq!(messages[1].message.content.text(), "Hello from the model");

        let stored = ctx.store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Say hello");
    }

    #[tokio::test]
    async fn chat_with_tool_round_persists_results() {
        let adapter = Arc::new(ScriptedAdapter::new(
            ProviderKind::DeltaChunk,
            vec![
                tool_calls(&[("call_1", "echo", json!({"text": "pong"}))]),
                answer("The tool said pong."),
            ],
        ));
        let ctx = scripted_context(adapter.clone());
        let conv = create(&ctx).await;

        let uri = format!("/api/conversations/{}/chat", conv.id);
        let (status, body) = send(&ctx, "POST", &uri, Some(json!({"content": "ping"}))).await;
        assert_eq!(status, StatusCode::OK);

        let frames = frames(&body);
        let result = frames
            .iter()
            .find(|(e, _)| e == "tool_result")
            .map(|(_, d)| d["data"]["result"].clone());
        assert_eq!(result, Some(json!("pong")));
        assert_eq!(frames.last().map(|(e, _)| e.as_str()), Some("done"));

        let messages: Vec<Message> = ctx
            .store
            .messages(&conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message)
            .collect();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].tool_calls()[0].id, "call_1");
        assert_eq!(messages[2], Message::tool("call_1", "pong"));
        assert_eq!(messages[3].content.text(), "The tool said pong.");
        assert_eq!(adapter.call_count(), 2);
    }

    #[tokio::test]
    async fn second_turn_sees_first_turn_history() {
        let adapter = Arc::new(ScriptedAdapter::repeating(
            ProviderKind::ContentBlock,
            answer("ok"),
        ));
        let ctx = scripted_context(adapter.clone());
        let conv = create(&ctx).await;
        let uri = format!("/api/conversations/{}/chat", conv.id);

        send(&ctx, "POST", &uri, Some(json!({"content": "first"}))).await;
        send(&ctx, "POST", &uri, Some(json!({"content": "second"}))).await;

        let requests = adapter.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[1].messages[2], Message::user("second"));

        let stored = ctx.store.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "first");
    }

    #[tokio::test]
    async fn chat_error_event_is_streamed() {
        let adapter = Arc::new(ScriptedAdapter::new(
            ProviderKind::ContentBlock,
            vec![vec![AgentEvent::error("Invalid API key for anthropic")]],
        ));
        let ctx = scripted_context(adapter);
        let conv = create(&ctx).await;

        let uri = format!("/api/conversations/{}/chat", conv.id);
        let (status, body) = send(&ctx, "POST", &uri, Some(json!({"content": "hi"}))).await;
        assert_eq!(status, StatusCode::OK);
        let frames = frames(&body);
        let last = frames.last().unwrap();
        assert_eq!(last.0, "error");
        assert_eq!(last.1["data"]["message"], "Invalid API key for anthropic");

        // Only the user message is logged.
        assert_eq!(ctx.store.messages(&conv.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_turn_never_logs_an_unanswered_tool_call() {
        let adapter = Arc::new(ScriptedAdapter::new(
            ProviderKind::DeltaChunk,
            vec![
                vec![
                    AgentEvent::tool_call(localforge_core::message::ToolCall {
                        id: "call_9".into(),
                        name: "echo".into(),
                        input: json!({"text": "never runs"}),
                    }),
                    AgentEvent::error("Stream interrupted: connection reset"),
                ],
                answer("Back again."),
            ],
        ));
        let ctx = scripted_context(adapter.clone());
        let conv = create(&ctx).await;
        let uri = format!("/api/conversations/{}/chat", conv.id);

        send(&ctx, "POST", &uri, Some(json!({"content": "first"}))).await;
        let messages: Vec<Message> = ctx
            .store
            .messages(&conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message)
            .collect();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].tool_calls()[0].id, "call_9");
        assert_eq!(
            messages[2],
            Message::tool("call_9", localforge_agent::INTERRUPTED_TOOL_RESULT)
        );

        // The next turn replays a history where the call is answered.
        send(&ctx, "POST", &uri, Some(json!({"content": "again"}))).await;
        let replayed = &adapter.requests()[1].messages;
        assert_eq!(replayed.len(), 4);
        assert_eq!(replayed[2].tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(replayed[3], Message::user("again"));
    }

    #[tokio::test]
    async fn chat_rejects_unknown_conversation_and_empty_content() {
        let ctx = text_context("hi");
        let (status, _) = send(
            &ctx,
            "POST",
            "/api/conversations/missing/chat",
            Some(json!({"content": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let conv = create(&ctx).await;
        let uri = format!("/api/conversations/{}/chat", conv.id);
        let (status, _) = send(&ctx, "POST", &uri, Some(json!({"content": "   "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_with_unknown_model_is_bad_request() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = Arc::new(ServerContext::new(AppConfig::default(), store));
        let conv = create(&ctx).await;
        let uri = format!("/api/conversations/{}/chat", conv.id);
        let (status, body) = send(
            &ctx,
            "POST",
            &uri,
            Some(json!({"content": "hi", "model": "no-such-model"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(String::from_utf8_lossy(&body).contains("no-such-model"));
        // Nothing was logged for a turn that never started.
        assert!(ctx.store.messages(&conv.id).await.unwrap().is_empty());
    }

    #[test]
    fn auto_title_is_single_line_and_bounded() {
        assert_eq!(auto_title("  hello\n  world "), "hello world");
        let long = "x".repeat(100);
        assert_eq!(auto_title(&long).chars().count(), AUTO_TITLE_CHARS);
    }
}
