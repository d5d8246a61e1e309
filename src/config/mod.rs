//! Application configuration

pub mod client;
pub mod prompts;

use std::env;
use std::path::PathBuf;

use crate::core::ChatSettings;
use crate::providers::GeminiConfig;

pub use client::{CoachConfig, LimitsConfig};
pub use prompts::builtin as prompts_builtin;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub gemini_api_key: Option<String>,
    pub coach: CoachConfig,
}

impl Config {
    /// Read `HOST`, `PORT`, the optional `STUDY_COACH_CONFIG` file and the
    /// Gemini overrides (`GEMINI_MODEL`, `GEMINI_URL`)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut coach = match env::var("STUDY_COACH_CONFIG") {
            Ok(path) => CoachConfig::from_file(&PathBuf::from(path))?,
            Err(_) => CoachConfig::default(),
        };

        if let Ok(model) = env::var("GEMINI_MODEL") {
            coach.llm.model = model;
        }
        if let Ok(url) = env::var("GEMINI_URL") {
            coach.llm.endpoint = url;
        }

        let gemini_api_key = env::var(&coach.llm.api_key_env)
            .or_else(|_| env::var("API_KEY"))
            .ok();

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            gemini_api_key,
            coach,
        })
    }

    pub fn gemini(&self) -> GeminiConfig {
        GeminiConfig {
            api_key: self.gemini_api_key.clone(),
            timeout_secs: self.coach.llm.timeout_secs,
            ..GeminiConfig::default()
        }
        .with_model(self.coach.llm.model.as_str())
        .with_base_url(self.coach.llm.endpoint.as_str())
    }

    pub fn chat_settings(&self) -> ChatSettings {
        let defaults = ChatSettings::default();
        ChatSettings {
            system_instruction: self
                .coach
                .chat
                .system_instruction
                .clone()
                .unwrap_or(defaults.system_instruction),
            greeting: match &self.coach.chat.greeting {
                Some(greeting) if greeting.is_empty() => None,
                Some(greeting) => Some(greeting.clone()),
                None => defaults.greeting,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 3000,
            gemini_api_key: Some("key".to_string()),
            coach: CoachConfig::from_toml(toml).unwrap(),
        }
    }

    #[test]
    fn test_gemini_config() {
        let gemini = config("[llm]\nmodel = \"gemini-2.0-flash\"\nendpoint = \"http://localhost:9000/\"").gemini();
        assert_eq!(gemini.model, "gemini-2.0-flash");
        assert_eq!(gemini.base_url, "http://localhost:9000");
        assert_eq!(gemini.api_key.as_deref(), Some("key"));
        assert_eq!(gemini.timeout_secs, 120);
    }

    #[test]
    fn test_chat_settings() {
        let defaults = config("").chat_settings();
        assert_eq!(defaults.system_instruction, prompts_builtin::SYSTEM_INSTRUCTION);
        assert_eq!(defaults.greeting.as_deref(), Some(prompts_builtin::GREETING));

        let custom = config("[chat]\ngreeting = \"\"\nsystem_instruction = \"Tutor\"").chat_settings();
        assert_eq!(custom.system_instruction, "Tutor");
        assert!(custom.greeting.is_none());
    }
}
