//! Configuration for the dialogue engine
//!
//! Values are layered: an optional TOML file, then `DIALOGUE__SECTION__KEY`
//! environment variables. The provider key falls back to `OPENAI_API_KEY`.
//! The session itself never reads files or the environment; it receives the
//! resolved [`SessionSettings`] and [`OpenAiConfig`].

use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::context::{known_context_window, TokenBudget};
use crate::error::{DialogueError, Result};
use crate::session::SessionSettings;
use crate::transport::{OpenAiConfig, SamplingOptions};

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "dialogue.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "DIALOGUE";

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub sampling: SamplingOptions,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Prompt macros: `.name` in user input expands to the text
    #[serde(default)]
    pub prompts: HashMap<String, String>,
}

/// Model and budget settings
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    /// Context window; defaults to the known window of the model
    #[serde(default)]
    pub max_context_tokens: Option<usize>,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,

    /// System role text
    #[serde(default = "default_role")]
    pub role: String,

    /// Minimum growth in characters between displayed snapshots
    #[serde(default = "default_min_chunk")]
    pub min_chunk: usize,
}

fn default_model_name() -> String {
    "gpt-4".to_string()
}

fn default_max_output_tokens() -> usize {
    1000
}

fn default_role() -> String {
    "You play role of professional developer who obsessed with clean code.".to_string()
}

fn default_min_chunk() -> usize {
    10
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            max_context_tokens: None,
            max_output_tokens: default_max_output_tokens(),
            role: default_role(),
            min_chunk: default_min_chunk(),
        }
    }
}

impl ModelConfig {
    /// Token budget, filling the context window from the known-model table
    pub fn budget(&self) -> TokenBudget {
        let max_context = self
            .max_context_tokens
            .or_else(|| known_context_window(&self.name));
        TokenBudget::new(max_context, self.max_output_tokens)
    }
}

/// Completion provider connection
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<SecretString>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load from `path` (or `dialogue.toml` if present) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => ::config::File::from(path).required(true),
            None => ::config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let builder = ::config::Config::builder()
            .add_source(file)
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );

        let config = Self::build(builder)?
            .with_api_key_fallback(std::env::var("OPENAI_API_KEY").ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting files or the environment
    pub fn from_toml(source: &str) -> Result<Self> {
        let builder = ::config::Config::builder()
            .add_source(::config::File::from_str(source, ::config::FileFormat::Toml));
        let config = Self::build(builder)?;
        config.validate()?;
        Ok(config)
    }

    fn build(builder: ::config::ConfigBuilder<::config::builder::DefaultState>) -> Result<Self> {
        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DialogueError::Configuration(e.to_string()))
    }

    /// Use `key` as the provider key unless one is configured
    pub fn with_api_key_fallback(mut self, key: Option<String>) -> Self {
        if self.provider.api_key.is_none() {
            self.provider.api_key = key.filter(|k| !k.is_empty()).map(SecretString::new);
        }
        self
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            return Err(DialogueError::Configuration("model.name must not be empty".into()));
        }
        if self.model.max_output_tokens == 0 {
            return Err(DialogueError::Configuration(
                "model.max_output_tokens must be positive".into(),
            ));
        }
        if self.model.max_context_tokens == Some(0) {
            return Err(DialogueError::Configuration(
                "model.max_context_tokens must be positive when set".into(),
            ));
        }
        if self.model.min_chunk == 0 {
            return Err(DialogueError::Configuration("model.min_chunk must be positive".into()));
        }
        Ok(())
    }

    /// Settings for a [`StreamingSession`](crate::session::StreamingSession)
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings::new(&self.model.name, &self.model.role, self.model.budget())
            .with_min_chunk(self.model.min_chunk)
            .with_options(self.sampling.clone())
    }

    /// Connection settings for [`OpenAiTransport`](crate::transport::OpenAiTransport)
    pub fn openai_config(&self) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.provider.base_url.clone(),
            api_key: self.provider.api_key.clone(),
            timeout: Duration::from_secs(self.provider.timeout_secs),
        }
    }
}
