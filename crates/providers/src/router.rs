//! Model router: builds the right adapter for a configured model.
//!
//! Anthropic models get the native content-block adapter; every other
//! provider is reached through the OpenAI-compatible adapter.

use std::sync::Arc;

use localforge_config::{AppConfig, ModelConfig};
use localforge_core::error::ProviderError;
use localforge_core::provider::ModelAdapter;
use serde::Serialize;
use tracing::debug;

use crate::anthropic::AnthropicAdapter;
use crate::openai_compat::OpenAiCompatAdapter;

/// Key sent to local Ollama servers, which ignore it.
const OLLAMA_KEY: &str = "ollama";

/// Placeholder key for keyless OpenAI-compatible endpoints.
const NO_KEY: &str = "no-key";

/// A model as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub display_name: String,
    pub provider: String,
    pub has_key: bool,
}

/// Builds adapters from configuration, sharing one HTTP connection pool.
#[derive(Clone)]
pub struct ModelRouter {
    models: Vec<ModelConfig>,
    default_model: String,
    client: reqwest::Client,
}

impl ModelRouter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            models: config.models.clone(),
            default_model: config.default_model.clone(),
            client: crate::http_client(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Build an adapter for `model`, or the default model when `None`.
    pub fn adapter(&self, model: Option<&str>) -> Result<Arc<dyn ModelAdapter>, ProviderError> {
        let name = model.unwrap_or(&self.default_model);
        let config = self
            .models
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| ProviderError::ModelNotFound(name.to_string()))?;
        adapter_for(config, self.client.clone())
    }

    pub fn models(&self) -> Vec<ModelInfo> {
        self.models.iter().map(model_info).collect()
    }
}

/// Build an adapter for a model name using the given configuration.
pub fn build_adapter(
    model_name: &str,
    config: &AppConfig,
) -> Result<Arc<dyn ModelAdapter>, ProviderError> {
    ModelRouter::from_config(config).adapter(Some(model_name))
}

/// List configured models with whether credentials are available.
pub fn available_models(config: &AppConfig) -> Vec<ModelInfo> {
    config.models.iter().map(model_info).collect()
}

fn model_info(model: &ModelConfig) -> ModelInfo {
    ModelInfo {
        name: model.name.clone(),
        display_name: if model.display_name.is_empty() {
            model.name.clone()
        } else {
            model.display_name.clone()
        },
        provider: model.provider.clone(),
        has_key: model.provider == "ollama" || model.resolve_api_key().is_some(),
    }
}

fn adapter_for(
    model: &ModelConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn ModelAdapter>, ProviderError> {
    let api_key = model.resolve_api_key();
    debug!(model = %model.name, provider = %model.provider, "Building adapter");

    if model.provider == "anthropic" {
        let key = api_key.ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no API key for '{}' (set {})",
                model.name,
                model.api_key_env.as_deref().unwrap_or("ANTHROPIC_API_KEY")
            ))
        })?;
        let mut adapter = AnthropicAdapter::new(&model.name, key).with_client(client);
        if let Some(url) = &model.base_url {
            adapter = adapter.with_base_url(url);
        }
        if let Some(max_tokens) = model.max_tokens {
            adapter = adapter.with_max_tokens(max_tokens);
        }
        return Ok(Arc::new(adapter));
    }

    let base_url = model
        .base_url
        .clone()
        .unwrap_or_else(|| default_base_url(&model.provider));
    let key = api_key.unwrap_or_else(|| {
        if model.provider == "ollama" {
            OLLAMA_KEY.to_string()
        } else {
            NO_KEY.to_string()
        }
    });

    Ok(Arc::new(
        OpenAiCompatAdapter::new(&model.provider, &model.name, base_url, key).with_client(client),
    ))
}

/// Default base URL for well-known OpenAI-compatible providers.
pub fn default_base_url(provider: &str) -> String {
    match provider {
        "openai" => "https://api.openai.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "mistral" => "https://api.mistral.ai/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => "https://api.openai.com/v1".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localforge_core::provider::ProviderKind;

    fn config_with(models: Vec<ModelConfig>) -> AppConfig {
        AppConfig {
            default_model: models[0].name.clone(),
            models,
            ..AppConfig::default()
        }
    }

    fn keyed(name: &str, provider: &str) -> ModelConfig {
        let mut m = ModelConfig::new(name, name, provider, None);
        m.api_key = Some("sk-test".into());
        m
    }

    #[test]
    fn unknown_model_is_not_found() {
        let config = config_with(vec![keyed("gpt-4o", "openai")]);
        let err = build_adapter("nope", &config).err().unwrap();
        assert!(matches!(err, ProviderError::ModelNotFound(ref n) if n == "nope"));
    }

    #[test]
    fn anthropic_without_key_is_not_configured() {
        let config = config_with(vec![ModelConfig::new(
            "claude-test",
            "Claude",
            "anthropic",
            Some("LOCALFORGE_TEST_UNSET_KEY_VAR"),
        )]);
        let err = build_adapter("claude-test", &config).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(err.to_string().contains("LOCALFORGE_TEST_UNSET_KEY_VAR"));
    }

    #[test]
    fn anthropic_with_key_is_content_block() {
        let config = config_with(vec![keyed("claude-test", "anthropic")]);
        let adapter = build_adapter("claude-test", &config).unwrap();
        assert_eq!(adapter.name(), "anthropic");
        assert_eq!(adapter.kind(), ProviderKind::ContentBlock);
        assert_eq!(adapter.model(), "claude-test");
    }

    #[tokio::test]
    async fn configured_max_tokens_reaches_anthropic() {
        use localforge_core::CancellationToken;
        use localforge_core::message::Message;
        use localforge_core::provider::ChatRequest;
        use wiremock::matchers::{body_partial_json, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"max_tokens": 2048})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"type\":\"message_stop\"}\n\n",
                "text/event-stream",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let mut model = keyed("claude-test", "anthropic");
        model.base_url = Some(server.uri());
        model.max_tokens = Some(2048);
        let adapter = build_adapter("claude-test", &config_with(vec![model])).unwrap();

        let request = ChatRequest {
            messages: vec![Message::user("hi")],
            tools: Vec::new(),
            system: String::new(),
        };
        let mut rx = adapter.stream(request, CancellationToken::new());
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(localforge_core::event::AgentEvent::done("end_turn")));
    }

    #[test]
    fn compatible_providers_are_delta_chunk() {
        let config = config_with(vec![keyed("llama", "groq")]);
        let adapter = build_adapter("llama", &config).unwrap();
        assert_eq!(adapter.name(), "groq");
        assert_eq!(adapter.kind(), ProviderKind::DeltaChunk);
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = config_with(vec![ModelConfig::new("llama3.2", "Llama", "ollama", None)]);
        assert!(build_adapter("llama3.2", &config).is_ok());
        let models = available_models(&config);
        assert!(models[0].has_key);
    }

    #[test]
    fn keyless_remote_provider_still_builds() {
        let config = config_with(vec![ModelConfig::new(
            "some-model",
            "",
            "together",
            Some("LOCALFORGE_TEST_UNSET_KEY_VAR"),
        )]);
        assert!(build_adapter("some-model", &config).is_ok());
        let models = available_models(&config);
        assert!(!models[0].has_key);
        assert_eq!(models[0].display_name, "some-model");
    }

    #[test]
    fn router_falls_back_to_default_model() {
        let config = config_with(vec![keyed("gpt-4o", "openai"), keyed("llama", "groq")]);
        let router = ModelRouter::from_config(&config);
        assert_eq!(router.default_model(), "gpt-4o");
        assert_eq!(router.adapter(None).unwrap().model(), "gpt-4o");
        assert_eq!(router.adapter(Some("llama")).unwrap().model(), "llama");
        assert_eq!(router.models().len(), 2);
    }

    #[test]
    fn default_urls() {
        assert_eq!(default_base_url("ollama"), "http://localhost:11434/v1");
        assert_eq!(default_base_url("groq"), "https://api.groq.com/openai/v1");
        assert_eq!(default_base_url("mistral"), "https://api.mistral.ai/v1");
    }
}
