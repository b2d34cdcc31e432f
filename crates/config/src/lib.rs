//! Configuration loading, validation, and management for Cairn.
//!
//! Loads configuration from `~/.cairn/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use cairn_core::agent::AgentConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Model backends the binary knows how to build.
pub const PROVIDERS: [&str; 4] = ["openai", "openrouter", "ollama", "custom"];
/// Agent memory backends.
pub const MEMORY_BACKENDS: [&str; 3] = ["memory", "file", "none"];
/// Conversation store backends.
pub const STORE_BACKENDS: [&str; 3] = ["memory", "file", "sqlite"];

/// The root configuration structure.
///
/// Maps directly to `~/.cairn/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model backend: one of [`PROVIDERS`]
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL override; required for `custom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Request timeout for the model backend, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub agent: AgentSection,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub prompt: PromptConfig,

    #[serde(default)]
    pub query_log: QueryLogConfig,

    #[serde(default)]
    pub sql_guard: SqlGuardConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    120
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("store", &self.store)
            .field("audit", &self.audit)
            .field("gateway", &self.gateway)
            .field("prompt", &self.prompt)
            .field("query_log", &self.query_log)
            .field("sql_guard", &self.sql_guard)
            .field("database", &self.database)
            .finish()
    }
}

// ── [agent] ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Model calls allowed per turn
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    #[serde(default)]
    pub stream_responses: bool,

    #[serde(default = "default_true")]
    pub auto_save_conversations: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Capacity of the per-turn output channel
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,

    /// Longest accepted user message, in characters
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// History messages sent to the model per call; 0 sends everything
    #[serde(default)]
    pub max_history_messages: usize,

    /// Retries on transient tool and model failures; 0 fails fast
    #[serde(default)]
    pub max_retries: u32,
}

fn default_max_tool_iterations() -> u32 {
    10
}
fn default_output_buffer() -> usize {
    128
}
fn default_max_message_chars() -> usize {
    8000
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            stream_responses: false,
            auto_save_conversations: true,
            max_tokens: None,
            output_buffer: default_output_buffer(),
            max_message_chars: default_max_message_chars(),
            max_history_messages: 0,
            max_retries: 0,
        }
    }
}

// ── [memory] ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// One of [`MEMORY_BACKENDS`]
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// JSONL file for the `file` backend; defaults to
    /// `~/.cairn/memory/agent_memory.jsonl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Inject similar past queries into the system prompt
    #[serde(default = "default_true")]
    pub enhance_prompt: bool,

    #[serde(default = "default_max_examples")]
    pub max_examples: usize,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Lower the threshold step by step until enough examples are found
    #[serde(default)]
    pub adaptive: bool,

    #[serde(default = "default_min_threshold")]
    pub min_threshold: f32,

    /// Groups allowed to save memories; empty lets everyone save
    #[serde(default = "default_save_groups")]
    pub save_groups: Vec<String>,
}

fn default_memory_backend() -> String {
    "file".into()
}
fn default_max_examples() -> usize {
    5
}
fn default_similarity_threshold() -> f32 {
    0.7
}
fn default_min_threshold() -> f32 {
    0.3
}
fn default_save_groups() -> Vec<String> {
    vec!["admin".into()]
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            enhance_prompt: true,
            max_examples: default_max_examples(),
            similarity_threshold: default_similarity_threshold(),
            adaptive: false,
            min_threshold: default_min_threshold(),
            save_groups: default_save_groups(),
        }
    }
}

// ── [store] ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// One of [`STORE_BACKENDS`]
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Directory (`file`) or database file (`sqlite`); defaults under `~/.cairn`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "file".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

// ── [audit] ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Parameter names containing any of these fragments are redacted
    #[serde(default = "default_redact_keys")]
    pub redact_keys: Vec<String>,

    /// Append audit records to this JSONL file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonl_path: Option<PathBuf>,
}

fn default_redact_keys() -> Vec<String> {
    ["password", "secret", "token", "api_key"].map(String::from).to_vec()
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_keys: default_redact_keys(),
            jsonl_path: None,
        }
    }
}

// ── [gateway] ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Cookie carrying the caller's e-mail
    #[serde(default = "default_identity_cookie")]
    pub identity_cookie: String,

    /// E-mails granted the `admin` group
    #[serde(default)]
    pub admin_emails: Vec<String>,

    /// Identity used when the cookie is absent
    #[serde(default = "default_fallback_email")]
    pub fallback_email: String,
}

fn default_port() -> u16 {
    8084
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_identity_cookie() -> String {
    "cairn_email".into()
}
fn default_fallback_email() -> String {
    "dev@local".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            identity_cookie: default_identity_cookie(),
            admin_emails: Vec::new(),
            fallback_email: default_fallback_email(),
        }
    }
}

// ── [prompt] ──────────────────────────────────────────────────────────────

/// System prompt settings.
///
/// With only `base_prompt` set the prompt is used verbatim; any domain
/// field switches to the sectioned domain prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_purpose: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub business_definitions: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sql_patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performance_hints: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_quality_notes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

impl PromptConfig {
    /// Whether any domain section is configured.
    pub fn has_domain_sections(&self) -> bool {
        self.database_type.is_some()
            || self.database_purpose.is_some()
            || !self.business_definitions.is_empty()
            || !self.sql_patterns.is_empty()
            || !self.performance_hints.is_empty()
            || !self.data_quality_notes.is_empty()
            || self.additional_context.is_some()
    }
}

// ── [query_log] ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryLogConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Defaults to `~/.cairn/query_log.jsonl`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Log every tool, not only `run_sql`
    #[serde(default)]
    pub all_tools: bool,

    /// Keep the first 100 characters of each result
    #[serde(default = "default_true")]
    pub result_preview: bool,
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            all_tools: false,
            result_preview: true,
        }
    }
}

// ── [sql_guard] ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlGuardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sql_tool")]
    pub tool_name: String,
}

fn default_sql_tool() -> String {
    "run_sql".into()
}

impl Default for SqlGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tool_name: default_sql_tool(),
        }
    }
}

// ── [database] ────────────────────────────────────────────────────────────

/// The database behind `run_sql`. The tool is registered only when a URL
/// is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Groups allowed to run SQL; empty lets everyone
    #[serde(default)]
    pub access_groups: Vec<String>,

    /// Rows rendered into the model-facing table
    #[serde(default = "default_max_rows")]
    pub max_rows_in_output: usize,
}

fn default_max_rows() -> usize {
    50
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            access_groups: Vec::new(),
            max_rows_in_output: default_max_rows(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.cairn/config.toml).
    ///
    /// Environment overrides:
    /// - `CAIRN_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `CAIRN_API_URL`
    /// - `CAIRN_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("CAIRN_API_KEY").or_else(|| {
            if self.api_key.is_none() {
                lookup("OPENAI_API_KEY")
            } else {
                None
            }
        }) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("CAIRN_API_URL") {
            self.api_url = Some(url);
        }
        if let Some(model) = lookup("CAIRN_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".cairn")
    }

    /// Where the file-backed agent memory lives.
    pub fn memory_path(&self) -> PathBuf {
        self.memory
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("memory").join("agent_memory.jsonl"))
    }

    /// Where the file or SQLite conversation store lives.
    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(|| match self.store.backend.as_str() {
            "sqlite" => Self::config_dir().join("conversations.db"),
            _ => Self::config_dir().join("conversations"),
        })
    }

    pub fn query_log_path(&self) -> PathBuf {
        self.query_log
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("query_log.jsonl"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be at least 1".into(),
            ));
        }
        if self.agent.output_buffer == 0 {
            return Err(ConfigError::ValidationError("agent.output_buffer must be at least 1".into()));
        }
        check_known("provider", &self.provider, &PROVIDERS)?;
        check_known("memory.backend", &self.memory.backend, &MEMORY_BACKENDS)?;
        check_known("store.backend", &self.store.backend, &STORE_BACKENDS)?;
        if self.provider == "custom" && self.api_url.is_none() {
            return Err(ConfigError::ValidationError(
                "provider \"custom\" requires api_url".into(),
            ));
        }
        let thresholds = [self.memory.similarity_threshold, self.memory.min_threshold];
        if thresholds.iter().any(|t| !(0.0..=1.0).contains(t)) {
            return Err(ConfigError::ValidationError(
                "memory thresholds must be between 0.0 and 1.0".into(),
            ));
        }
        if self.memory.min_threshold > self.memory.similarity_threshold {
            return Err(ConfigError::ValidationError(
                "memory.min_threshold must not exceed memory.similarity_threshold".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// The turn-scoped settings handed to the agent.
    pub fn to_agent_config(&self) -> AgentConfig {
        AgentConfig {
            model: self.default_model.clone(),
            max_tool_iterations: self.agent.max_tool_iterations,
            stream_responses: self.agent.stream_responses,
            auto_save_conversations: self.agent.auto_save_conversations,
            temperature: self.default_temperature,
            max_tokens: self.agent.max_tokens,
            output_buffer: self.agent.output_buffer,
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn check_known(field: &str, value: &str, known: &[&str]) -> Result<(), ConfigError> {
    if known.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "unknown {field} \"{value}\" (expected one of: {})",
            known.join(", ")
        )))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            api_url: None,
            default_model: default_model(),
            default_temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
            agent: AgentSection::default(),
            memory: MemoryConfig::default(),
            store: StoreConfig::default(),
            audit: AuditConfig::default(),
            gateway: GatewayConfig::default(),
            prompt: PromptConfig::default(),
            query_log: QueryLogConfig::default(),
            sql_guard: SqlGuardConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
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
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider, "openai");
        assert_eq!(config.gateway.port, 8084);
        assert_eq!(config.gateway.identity_cookie, "cairn_email");
        assert_eq!(config.agent.max_tool_iterations, 10);
        assert!(config.agent.auto_save_conversations);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider, config.provider);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.audit.redact_keys, config.audit.redact_keys);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_iterations_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_tool_iterations = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_tool_iterations"));
    }

    #[test]
    fn unknown_backends_rejected() {
        let mut config = AppConfig::default();
        config.store.backend = "redis".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("store.backend"));

        let config = AppConfig {
            provider: "mystery".into(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn custom_provider_needs_url() {
        let mut config = AppConfig {
            provider: "custom".into(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
        config.api_url = Some("http://localhost:8000/v1".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider, "openai");
    }

    #[test]
    fn sections_parse_from_toml() {
        let toml_str = r#"
default_model = "gpt-4o"

[agent]
max_tool_iterations = 3
stream_responses = true

[store]
backend = "sqlite"
path = "/tmp/cairn.db"

[gateway]
admin_emails = ["boss@example.com"]

[prompt]
base_prompt = "You are a warehouse analyst."
database_type = "PostgreSQL"
sql_patterns = ["Use date_trunc for monthly rollups"]

[prompt.business_definitions]
"active customer" = "ordered in the last 90 days"

[query_log]
enabled = true
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_tool_iterations, 3);
        assert_eq!(config.store_path(), PathBuf::from("/tmp/cairn.db"));
        assert_eq!(config.gateway.admin_emails, vec!["boss@example.com"]);
        assert!(config.prompt.has_domain_sections());
        assert_eq!(
            config.prompt.business_definitions.get("active customer").map(String::as_str),
            Some("ordered in the last 90 days")
        );
        assert!(config.query_log.enabled);
        assert!(config.query_log.result_preview);

        let agent = config.to_agent_config();
        assert_eq!(agent.model, "gpt-4o");
        assert_eq!(agent.max_tool_iterations, 3);
        assert!(agent.stream_responses);
    }

    #[test]
    fn load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_temperature = 3.5\n").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        std::fs::write(&path, "not = [valid").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn env_overrides_apply_in_priority_order() {
        let env: HashMap<&str, &str> = [
            ("CAIRN_API_KEY", "cairn-key"),
            ("OPENAI_API_KEY", "openai-key"),
            ("CAIRN_MODEL", "gpt-4.1"),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("cairn-key"));
        assert_eq!(config.default_model, "gpt-4.1");

        let mut config = AppConfig::default();
        config.apply_env(|k| (k == "OPENAI_API_KEY").then(|| "openai-key".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("openai-key"));

        // A key from the file wins over OPENAI_API_KEY, not over CAIRN_API_KEY.
        let mut config = AppConfig {
            api_key: Some("file-key".into()),
            ..AppConfig::default()
        };
        config.apply_env(|k| (k == "OPENAI_API_KEY").then(|| "openai-key".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("file-key"));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-very-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("8084"));
    }

    #[test]
    fn default_paths_live_under_config_dir() {
        let config = AppConfig::default();
        assert!(config.memory_path().starts_with(AppConfig::config_dir()));
        assert!(config.store_path().ends_with("conversations"));
        assert!(config.query_log_path().ends_with("query_log.jsonl"));
    }
}
