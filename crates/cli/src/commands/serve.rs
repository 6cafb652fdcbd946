//! `localforge serve`: start the HTTP/SSE server.

use std::sync::Arc;

use anyhow::Context;
use localforge_config::AppConfig;
use localforge_gateway::{Server, ServerContext};

pub async fn run(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let auth = config.server.api_key.is_some();
    let ctx = ServerContext::from_config(config)
        .await
        .context("Failed to open conversation store")?;
    let store = ctx.store.name().to_string();

    let server = Server::start(Arc::new(ctx), &addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    println!("🔨 LocalForge server");
    println!("   Listening: http://{}", server.local_addr());
    println!("   Store:     {store}");
    println!("   API key:   {}", if auth { "required" } else { "not required" });

    let token = server.shutdown_token();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => server.shutdown().await?,
        _ = token.cancelled() => server.wait().await?,
    }

    Ok(())
}
