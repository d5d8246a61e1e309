//! Deployment configuration loaded from a TOML file
//!
//! Every section is optional:
//! - `[client]` - deployment name
//! - `[llm]` - Gemini model, key variable, endpoint and timeout
//! - `[limits]` - character budgets for the study tools
//! - `[chat]` - greeting and system instruction overrides

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::providers::gemini::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoachConfig {
    #[serde(default)]
    pub client: ClientInfo,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub chat: ChatConfig,
}

impl CoachConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: CoachConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
        }
        if let Some(instruction) = &self.chat.system_instruction {
            if instruction.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "chat.system_instruction must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default = "default_client_name")]
    pub name: String,
}

fn default_client_name() -> String {
    "Study Coach".to_string()
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: default_client_name(),
        }
    }
}

/// Gemini settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_endpoint() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key_env: default_api_key_env(),
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Character budgets for text embedded in study tool prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_flashcard_chars")]
    pub flashcard_context_chars: usize,

    #[serde(default = "default_summary_chars")]
    pub summary_context_chars: usize,

    #[serde(default = "default_plan_chars")]
    pub plan_context_chars: usize,
}

fn default_flashcard_chars() -> usize {
    10_000
}

fn default_summary_chars() -> usize {
    15_000
}

fn default_plan_chars() -> usize {
    5_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            flashcard_context_chars: default_flashcard_chars(),
            summary_context_chars: default_summary_chars(),
            plan_context_chars: default_plan_chars(),
        }
    }
}

/// Chat overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Replaces the built-in greeting; an empty string disables it
    #[serde(default)]
    pub greeting: Option<String>,

    /// Replaces the built-in system instruction
    #[serde(default)]
    pub system_instruction: Option<String>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
