//! Configuration for the pipeline, its model client and the tool subprocess
//!
//! Values come from an optional TOML file, then the process environment
//! (after loading `.env`). There is no process-wide client: the resulting
//! [`AppConfig`] is passed explicitly to every constructor that needs it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the completion endpoint
pub const ENV_API_URL: &str = "LLM_API_URL";
/// Default environment variable holding the API key
pub const ENV_API_KEY: &str = "LLM_API_KEY";
/// Environment variable holding the model identifier
pub const ENV_MODEL: &str = "LLM_MODEL";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub runner: RunnerSection,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub tool_session: ToolSessionSection,
    #[serde(default)]
    pub chat: ChatSection,
}

/// Model client section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    /// Completion endpoint (OpenAI-compatible, without `/chat/completions`)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model identifier
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// HTTP timeout per remote call
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            temperature: None,
            max_tokens: None,
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_api_key_env() -> String {
    ENV_API_KEY.to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

/// Runner section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunnerSection {
    /// Upper bound for any single stage call (classification, selection, delegate turn)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum model turns in a tool-augmented run
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    /// Extra attempts after a schema violation (0 or 1)
    #[serde(default)]
    pub schema_retries: u32,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            max_tool_iterations: default_max_tool_iterations(),
            schema_retries: 0,
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    90
}

fn default_max_tool_iterations() -> usize {
    10
}

/// Delegate selection policy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// The router agent's model picks a delegate by name
    #[default]
    Model,
    /// A fixed guard-to-delegate table picks the delegate
    Rules,
}

/// Router section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterSection {
    /// Model used by the classifier, the router and its delegates
    #[serde(default = "default_router_model")]
    pub model: String,
    #[serde(default)]
    pub selection: SelectionPolicy,
    /// Guard name to delegate name, used when `selection = "rules"`
    #[serde(default)]
    pub rules: BTreeMap<String, String>,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            model: default_router_model(),
            selection: SelectionPolicy::default(),
            rules: BTreeMap::new(),
        }
    }
}

fn default_router_model() -> String {
    "gpt-4o-mini".to_string()
}

/// External tool subprocess section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSessionSection {
    #[serde(default = "default_tool_command")]
    pub command: String,
    #[serde(default = "default_tool_args")]
    pub args: Vec<String>,
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Viewport as `"WIDTH,HEIGHT"`
    #[serde(default = "default_viewport")]
    pub viewport: String,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for ToolSessionSection {
    fn default() -> Self {
        Self {
            command: default_tool_command(),
            args: default_tool_args(),
            headless: true,
            viewport: default_viewport(),
            startup_timeout_secs: default_startup_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_tool_command() -> String {
    "npx".to_string()
}

fn default_tool_args() -> Vec<String> {
    vec!["@playwright/mcp@latest".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_viewport() -> String {
    "1280,720".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_call_timeout_secs() -> u64 {
    60
}

impl ToolSessionSection {
    /// Full argument list for the subprocess, startup flags included
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if self.headless {
            args.push("--headless".to_string());
        }
        if !self.viewport.is_empty() {
            args.push("--viewport-size".to_string());
            args.push(self.viewport.clone());
        }
        args
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Interactive chat section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSection {
    #[serde(default = "default_exit_keywords")]
    pub exit_keywords: Vec<String>,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            exit_keywords: default_exit_keywords(),
        }
    }
}

fn default_exit_keywords() -> Vec<String> {
    ["salir", "exit", "adios", "chao"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults and the process environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `LLM_API_URL` and `LLM_MODEL` using the given lookup
    ///
    /// Empty values are ignored so a blank `.env` entry does not erase a file setting.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|v| !v.trim().is_empty()) {
            self.llm.base_url = url.trim().to_string();
        }
        if let Some(model) = lookup(ENV_MODEL).filter(|v| !v.trim().is_empty()) {
            self.llm.model = model.trim().to_string();
        }
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.llm.base_url.is_empty() {
            url::Url::parse(&self.llm.base_url).map_err(|e| {
                ConfigError::InvalidConfig(format!(
                    "llm.base_url '{}' is not a valid URL: {e}",
                    self.llm.base_url
                ))
            })?;
        }

        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "llm.model must not be empty".to_string(),
            ));
        }

        if self.runner.schema_retries > 1 {
            return Err(ConfigError::InvalidConfig(format!(
                "runner.schema_retries must be 0 or 1, got {}",
                self.runner.schema_retries
            )));
        }

        if self.runner.max_tool_iterations == 0 {
            return Err(ConfigError::InvalidConfig(
                "runner.max_tool_iterations must be at least 1".to_string(),
            ));
        }

        if self.router.model.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "router.model must not be empty".to_string(),
            ));
        }

        if self.router.selection == SelectionPolicy::Rules && self.router.rules.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "router.selection = \"rules\" requires a [router.rules] table".to_string(),
            ));
        }

        Ok(())
    }

    /// Read the API key from the configured environment variable
    ///
    /// A missing variable yields an empty key; the failure then surfaces on the
    /// first remote call instead of at startup.
    pub fn api_key(&self) -> String {
        std::env::var(&self.llm.api_key_env).unwrap_or_default()
    }

    /// Read the API key, failing when it is absent or empty
    pub fn require_api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.llm.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ConfigError::EnvVarNotFound(self.llm.api_key_env.clone())),
        }
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.runner.request_timeout_secs)
    }
}

/// Load `.env` from the working directory if one exists
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!("Ignoring unreadable .env file: {}", e),
    }
}
