//! Configuration loading, validation, and management for LocalForge.
//!
//! Loads configuration from `~/.localforge/config.toml` (or the file named
//! by `LOCALFORGE_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model used when a conversation does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Models that can be selected, in display order
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_model() -> String {
    "claude-sonnet-4-6".into()
}

fn default_true() -> bool {
    true
}

/// A selectable model and how to reach it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Identifier sent to the provider
    pub name: String,

    #[serde(default)]
    pub display_name: String,

    /// "anthropic", "openai", "groq", "openrouter", "ollama", ...
    pub provider: String,

    /// Inline API key (prefer `api_key_env`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Override for OpenAI-compatible endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Output token cap for Anthropic requests (defaults to 8096)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(name: &str, display_name: &str, provider: &str, api_key_env: Option<&str>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            provider: provider.into(),
            api_key: None,
            api_key_env: api_key_env.map(Into::into),
            base_url: None,
            max_tokens: None,
        }
    }

    /// The API key from the inline value or the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("api_key_env", &self.api_key_env)
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig::new("claude-sonnet-4-6", "Claude Sonnet 4.6", "anthropic", Some("ANTHROPIC_API_KEY")),
        ModelConfig::new("claude-opus-4-6", "Claude Opus 4.6", "anthropic", Some("ANTHROPIC_API_KEY")),
        ModelConfig::new("claude-haiku-4-5", "Claude Haiku 4.5", "anthropic", Some("ANTHROPIC_API_KEY")),
        ModelConfig::new("gpt-4o", "GPT-4o", "openai", Some("OPENAI_API_KEY")),
        ModelConfig::new("llama-3.3-70b-versatile", "Llama 3.3 70B (Groq)", "groq", Some("GROQ_API_KEY")),
        ModelConfig::new("openai/gpt-4o-mini", "GPT-4o mini (OpenRouter)", "openrouter", Some("OPENROUTER_API_KEY")),
        ModelConfig::new("mistral-large-latest", "Mistral Large", "mistral", Some("MISTRAL_API_KEY")),
        ModelConfig::new("deepseek-chat", "DeepSeek Chat", "deepseek", Some("DEEPSEEK_API_KEY")),
        ModelConfig::new("llama3.2", "Llama 3.2 (Ollama)", "ollama", None),
    ]
}

/// Agent loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Upper bound on model calls per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_max_iterations() -> u32 {
    20
}

fn default_system_prompt() -> String {
    "You are LocalForge, a helpful AI assistant with access to the local file system, \
     terminal, and web search. Always be precise when working with files and commands. \
     Ask for confirmation before destructive operations."
        .into()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub filesystem: FilesystemToolConfig,

    #[serde(default)]
    pub terminal: TerminalToolConfig,

    #[serde(default)]
    pub web_search: WebSearchToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Roots the file tools may touch; `~` expands to the home directory
    #[serde(default = "default_allowed_paths")]
    pub allowed_paths: Vec<String>,

    /// Tool names that raise a confirmation event before running
    #[serde(default = "default_confirm_tools")]
    pub require_confirmation_for: Vec<String>,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

fn default_allowed_paths() -> Vec<String> {
    vec!["~".into()]
}

fn default_confirm_tools() -> Vec<String> {
    vec!["write_file".into(), "delete_file".into()]
}

fn default_max_file_size_mb() -> u64 {
    10
}

impl Default for FilesystemToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_paths: default_allowed_paths(),
            require_confirmation_for: default_confirm_tools(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub require_confirmation: bool,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Substrings (case-insensitive) that refuse a command outright
    #[serde(default = "default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_blocked_patterns() -> Vec<String> {
    vec![
        "rm -rf /".into(),
        "mkfs".into(),
        "dd if=".into(),
        ":(){ :|:& };:".into(),
        "shutdown".into(),
        "reboot".into(),
    ]
}

impl Default for TerminalToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_confirmation: true,
            timeout_seconds: default_timeout_seconds(),
            blocked_patterns: default_blocked_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    5
}

impl Default for WebSearchToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: default_max_results(),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// When set, every route except `/api/health` requires this key as a
    /// bearer token or `X-API-Key` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Browser origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    [
        "http://localhost:5173",
        "http://127.0.0.1:5173",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Conversation storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" or "in_memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// SQLite database file; defaults to `~/.localforge/localforge.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_storage_backend() -> String {
    "sqlite".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: None,
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("localforge.db"))
    }
}

impl AppConfig {
    /// Load configuration from `LOCALFORGE_CONFIG` or `~/.localforge/config.toml`.
    ///
    /// Environment overrides (highest priority):
    /// - `LOCALFORGE_DEFAULT_MODEL`
    /// - `LOCALFORGE_HOST`
    /// - `LOCALFORGE_PORT`
    /// - `LOCALFORGE_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;

        if let Ok(model) = std::env::var("LOCALFORGE_DEFAULT_MODEL") {
            config.default_model = model;
        }
        if let Ok(host) = std::env::var("LOCALFORGE_HOST") {
            config.server.host = host;
        }
        if let Ok(key) = std::env::var("LOCALFORGE_API_KEY")
            && !key.trim().is_empty()
        {
            config.server.api_key = Some(key.trim().to_string());
        }
        if let Ok(port) = std::env::var("LOCALFORGE_PORT") {
            config.server.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("LOCALFORGE_PORT is not a port number: {port}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// The config file in use: `LOCALFORGE_CONFIG` or `~/.localforge/config.toml`.
    pub fn config_path() -> PathBuf {
        std::env::var("LOCALFORGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"))
    }

    /// A copy safe to display: inline secrets replaced with a marker.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for model in &mut copy.models {
            if model.api_key.is_some() {
                model.api_key = Some("[REDACTED]".into());
            }
        }
        if copy.server.api_key.is_some() {
            copy.server.api_key = Some("[REDACTED]".into());
        }
        copy
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        home_dir().join(".localforge")
    }

    pub fn get_model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.tools.terminal.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "tools.terminal.timeout_seconds must be at least 1".into(),
            ));
        }

        if self.tools.web_search.max_results == 0 {
            return Err(ConfigError::ValidationError(
                "tools.web_search.max_results must be at least 1".into(),
            ));
        }

        if !self.models.is_empty() && self.get_model(&self.default_model).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "default_model '{}' is not listed in models",
                self.default_model
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            models: default_models(),
            agent: AgentSettings::default(),
            tools: ToolsConfig::default(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Get the user's home directory.
pub fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_model, "claude-sonnet-4-6");
        assert_eq!(config.agent.max_iterations, 20);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.tools.filesystem.allowed_paths, vec!["~".to_string()]);
        assert_eq!(
            config.tools.filesystem.require_confirmation_for,
            vec!["write_file".to_string(), "delete_file".to_string()]
        );
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.models.len(), config.models.len());
        assert_eq!(parsed.tools.terminal.timeout_seconds, 30);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
default_model = "llama3.2"

[[models]]
name = "llama3.2"
provider = "ollama"

[tools.terminal]
timeout_seconds = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.tools.terminal.timeout_seconds, 5);
        assert!(config.tools.terminal.require_confirmation);
        assert_eq!(config.tools.web_search.max_results, 5);
        assert_eq!(config.models[0].max_tokens, None);
    }

    #[test]
    fn model_max_tokens_is_read() {
        let toml_str = r#"
default_model = "claude-haiku-4-5"

[[models]]
name = "claude-haiku-4-5"
provider = "anthropic"
api_key_env = "ANTHROPIC_API_KEY"
max_tokens = 2048
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.models[0].max_tokens, Some(2048));
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_default_model_rejected() {
        let config = AppConfig {
            default_model: "nope".into(),
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.default_model, "claude-sonnet-4-6");
    }

    #[test]
    fn invalid_toml_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_model = [").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn inline_key_wins_and_is_redacted() {
        let mut model = ModelConfig::new("gpt-4o", "GPT-4o", "openai", Some("LF_TEST_UNSET_KEY_VAR"));
        assert_eq!(model.resolve_api_key(), None);
        model.api_key = Some("sk-secret".into());
        assert_eq!(model.resolve_api_key().as_deref(), Some("sk-secret"));
        let debug = format!("{model:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn redacted_copy_hides_inline_keys() {
        let mut config = AppConfig::default();
        config.models[0].api_key = Some("sk-inline".into());
        config.server.api_key = Some("server-key".into());
        let shown = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(!shown.contains("sk-inline"));
        assert!(!shown.contains("server-key"));
        assert!(shown.contains("[REDACTED]"));
    }

    #[test]
    fn server_api_key_is_redacted() {
        let server = ServerConfig {
            api_key: Some("hunter2".into()),
            ..ServerConfig::default()
        };
        let debug = format!("{server:?}");
        assert!(!debug.contains("hunter2"));
        assert_eq!(server.cors_origins.len(), 4);
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("claude-sonnet-4-6"));
        assert!(toml_str.contains("max_iterations = 20"));
    }

    #[test]
    fn database_path_defaults_under_config_dir() {
        let storage = StorageConfig::default();
        assert!(storage.database_path().ends_with("localforge.db"));
    }
}
