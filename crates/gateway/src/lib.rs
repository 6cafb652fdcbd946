//! HTTP/SSE server for LocalForge.
//!
//! Exposes conversation management and a streaming chat endpoint backed by
//! the agent loop. Every request handler works off one [`ServerContext`]
//! built at startup.
//!
//! Built on Axum.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use localforge_agent::AgentLoop;
use localforge_config::AppConfig;
use localforge_core::error::{ProviderError, StoreError};
use localforge_core::provider::ModelAdapter;
use localforge_core::store::ConversationStore;
use localforge_core::CancellationToken;
use localforge_providers::ModelRouter;

/// Resolves a model name (or the default, for `None`) to an adapter.
pub type AdapterFactory =
    Arc<dyn Fn(Option<&str>) -> Result<Arc<dyn ModelAdapter>, ProviderError> + Send + Sync>;

/// Everything a request handler needs, shared across requests.
pub struct ServerContext {
    pub config: AppConfig,
    pub models: ModelRouter,
    pub agent: AgentLoop,
    pub store: Arc<dyn ConversationStore>,

    /// Parent of every turn's cancellation token.
    pub shutdown: CancellationToken,

    adapters: AdapterFactory,
}

pub type SharedContext = Arc<ServerContext>;

impl ServerContext {
    /// Build the context with the configured tools and model registry.
    pub fn new(config: AppConfig, store: Arc<dyn ConversationStore>) -> Self {
        let tools = localforge_tools::build_registry(&config);
        let agent = AgentLoop::from_config(&config, tools);
        let models = ModelRouter::from_config(&config);
        let router = models.clone();

        Self {
            config,
            models,
            agent,
            store,
            shutdown: CancellationToken::new(),
            adapters: Arc::new(move |model: Option<&str>| router.adapter(model)),
        }
    }

    /// Open the configured store and build the context on top of it.
    pub async fn from_config(config: AppConfig) -> Result<Self, StoreError> {
        let store = localforge_memory::open_store(&config.storage).await?;
        Ok(Self::new(config, store))
    }

    /// Replace how adapters are built (used to plug in scripted adapters).
    pub fn with_adapter_factory(
        mut self,
        factory: impl Fn(Option<&str>) -> Result<Arc<dyn ModelAdapter>, ProviderError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.adapters = Arc::new(factory);
        self
    }

    pub fn with_agent(mut self, agent: AgentLoop) -> Self {
        self.agent = agent;
        self
    }

    pub fn adapter(&self, model: Option<&str>) -> Result<Arc<dyn ModelAdapter>, ProviderError> {
        (self.adapters)(model)
    }
}

/// Build the Axum router with all routes.
///
/// Layers applied:
/// - API key check on everything but `/api/health` (when a key is configured)
/// - CORS restricted to the configured origins
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(ctx: SharedContext) -> Router {
    let cors = cors_layer(&ctx.config.server.cors_origins);

    api::routes()
        .layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware))
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-api-key"),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}

async fn auth_middleware(
    State(ctx): State<SharedContext>,
    req: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = ctx.config.server.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if req.uri().path() == "/api/health" {
        return Ok(next.run(req).await);
    }

    let headers = req.headers();
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))
        .map(str::trim);

    if provided == Some(expected) {
        Ok(next.run(req).await)
    } else {
        warn!(path = %req.uri().path(), "Unauthorized request: missing or invalid API key");
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// A running server.
pub struct Server {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl Server {
    /// Bind `addr` and start serving in the background.
    pub async fn start(ctx: SharedContext, addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = ctx.shutdown.clone();
        let signal = shutdown.clone();
        let app = build_router(ctx);

        info!(addr = %local_addr, "LocalForge server listening");
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        Ok(Self {
            addr: local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// A token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every running turn, stop accepting connections and wait for
    /// the listener to close.
    pub async fn shutdown(self) -> std::io::Result<()> {
        info!("Shutting down LocalForge server");
        self.shutdown.cancel();
        self.wait().await
    }

    /// Wait until the server stops.
    pub async fn wait(self) -> std::io::Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e)),
        }
    }
}
