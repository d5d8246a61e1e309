//! Single-shot study tools: summaries, flashcards, study plans, motivation
//!
//! Every tool here degrades instead of failing. Gateway errors, empty replies
//! and replies that don't match the declared schema become an empty list or a
//! fixed fallback text, logged at `warn`.

use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::{prompts_builtin, LimitsConfig};
use crate::providers::{Gateway, GenerateContentRequest, ProviderError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: String,
    pub front: String,
    pub back: String,
    pub difficulty: Difficulty,
    pub next_review: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanItemKind {
    Study,
    Break,
    Review,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPlanItem {
    pub id: String,
    pub title: String,
    /// `HH:MM`, 24h
    pub start_time: String,
    pub end_time: String,
    #[serde(rename = "type")]
    pub kind: PlanItemKind,
}

#[derive(Debug, Deserialize)]
struct FlashcardDraft {
    front: String,
    back: String,
    #[serde(default)]
    difficulty: Difficulty,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanItemDraft {
    title: String,
    start_time: String,
    end_time: String,
    #[serde(rename = "type")]
    kind: PlanItemKind,
}

/// Why a generation fell back to its default value
#[derive(Debug, thiserror::Error)]
pub(crate) enum GenerationDegraded {
    #[error(transparent)]
    Gateway(#[from] ProviderError),

    #[error("Empty response")]
    Empty,

    #[error("Malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid item: {0}")]
    Invalid(String),
}

pub struct StudyTools {
    gateway: Arc<dyn Gateway>,
    limits: LimitsConfig,
}

impl StudyTools {
    pub fn new(gateway: Arc<dyn Gateway>, limits: LimitsConfig) -> Self {
        Self { gateway, limits }
    }

    pub async fn summarize_notes(&self, notes: &str) -> String {
        let notes = truncate_chars(notes, self.limits.summary_context_chars);
        let request = GenerateContentRequest::prompt(prompts_builtin::summary_prompt(notes));

        match self.text(request).await {
            Ok(summary) => summary,
            Err(GenerationDegraded::Empty) => prompts_builtin::SUMMARY_EMPTY.to_string(),
            Err(e) => {
                warn!(error = %e, "Summary generation degraded");
                prompts_builtin::SUMMARY_FAILED.to_string()
            }
        }
    }

    pub async fn generate_motivation(&self) -> String {
        let request = GenerateContentRequest::prompt(prompts_builtin::MOTIVATION_PROMPT);

        match self.text(request).await {
            Ok(quote) => quote,
            Err(GenerationDegraded::Empty) => prompts_builtin::MOTIVATION_EMPTY.to_string(),
            Err(e) => {
                warn!(error = %e, "Motivation generation degraded");
                prompts_builtin::MOTIVATION_FAILED.to_string()
            }
        }
    }

    pub async fn generate_flashcards(&self, topic: &str, context: &str) -> Vec<Flashcard> {
        let context = truncate_chars(context, self.limits.flashcard_context_chars);
        let request = GenerateContentRequest::prompt(prompts_builtin::flashcards_prompt(topic, context))
            .with_json_schema(flashcard_schema());

        let result = self
            .structured::<FlashcardDraft>(request)
            .await
            .and_then(|drafts| drafts.into_iter().map(validate_flashcard).collect());

        result.unwrap_or_else(|e| {
            warn!(error = %e, "Flashcard generation degraded");
            Vec::new()
        })
    }

    pub async fn generate_study_plan(&self, goals: &str) -> Vec<StudyPlanItem> {
        let goals = truncate_chars(goals, self.limits.plan_context_chars);
        let request = GenerateContentRequest::prompt(prompts_builtin::study_plan_prompt(goals))
            .with_json_schema(study_plan_schema());

        let result = self
            .structured::<PlanItemDraft>(request)
            .await
            .and_then(|drafts| drafts.into_iter().map(validate_plan_item).collect());

        result.unwrap_or_else(|e| {
            warn!(error = %e, "Study plan generation degraded");
            Vec::new()
        })
    }

    async fn text(&self, request: GenerateContentRequest) -> Result<String, GenerationDegraded> {
        self.gateway
            .generate_content(request)
            .await?
            .filter(|text| !text.trim().is_empty())
            .ok_or(GenerationDegraded::Empty)
    }

    /// A reply that must be a JSON array of `T`. An empty reply is an empty list.
    async fn structured<T>(&self, request: GenerateContentRequest) -> Result<Vec<T>, GenerationDegraded>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self.text(request).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(GenerationDegraded::Empty) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

fn validate_flashcard(draft: FlashcardDraft) -> Result<Flashcard, GenerationDegraded> {
    if draft.front.trim().is_empty() || draft.back.trim().is_empty() {
        return Err(GenerationDegraded::Invalid("flashcard with an empty side".to_string()));
    }

    Ok(Flashcard {
        id: format!("gen-{}", uuid::Uuid::new_v4()),
        front: draft.front,
        back: draft.back,
        difficulty: draft.difficulty,
        next_review: Utc::now(),
    })
}

fn validate_plan_item(draft: PlanItemDraft) -> Result<StudyPlanItem, GenerationDegraded> {
    Ok(StudyPlanItem {
        id: uuid::Uuid::new_v4().to_string(),
        start_time: clock_time(&draft.start_time)?,
        end_time: clock_time(&draft.end_time)?,
        title: draft.title,
        kind: draft.kind,
    })
}

/// Normalize an `H:MM`/`HH:MM` time to `HH:MM`
fn clock_time(value: &str) -> Result<String, GenerationDegraded> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map(|t| t.format("%H:%M").to_string())
        .map_err(|_| GenerationDegraded::Invalid(format!("not a HH:MM time: {:?}", value)))
}

/// At most `max` characters of `text`, cut on a char boundary
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn flashcard_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "front": {
                    "type": "STRING",
                    "description": "The question or concept on the front of the card in English"
                },
                "back": {
                    "type": "STRING",
                    "description": "The answer or explanation on the back in English"
                },
                "difficulty": { "type": "STRING", "enum": ["easy", "medium", "hard"] }
            },
            "required": ["front", "back", "difficulty"]
        }
    })
}

fn study_plan_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING", "description": "Title of the session in English" },
                "startTime": { "type": "STRING", "description": "24h format e.g. 09:00" },
                "endTime": { "type": "STRING", "description": "24h format e.g. 10:00" },
                "type": { "type": "STRING", "enum": ["study", "break", "review"] }
            },
            "required": ["title", "startTime", "endTime", "type"]
        }
    })
}
