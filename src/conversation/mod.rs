//! Conversation transcript and its state transitions
//!
//! A [`Transcript`] is the ordered, user-visible record of one chat. It only
//! changes through [`TranscriptEvent`]s, so the rules about the single
//! in-flight assistant message live in one place:
//!
//! - user messages are created final and never change
//! - an assistant message starts empty with `streaming = true`, grows as
//!   fragments arrive, and is frozen by `FinalizeMessage`
//! - at most one message is streaming at any time

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Attachment;

/// Identifier of a transcript message.
///
/// Ids are derived from the creation time in milliseconds and bumped when two
/// messages land in the same millisecond, so they are strictly increasing for
/// the lifetime of a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Events accepted by [`Transcript::apply`]
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    AppendUserMessage {
        text: String,
        attachments: Vec<Attachment>,
    },
    BeginAssistantMessage,
    AppendFragment {
        id: MessageId,
        delta: String,
    },
    FinalizeMessage {
        id: MessageId,
    },
    /// Appends an assistant message that is final from the start
    AppendErrorMessage {
        text: String,
    },
    Clear,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("Message {0} is still streaming")]
    AlreadyStreaming(MessageId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
    #[serde(skip)]
    last_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            last_id: 0,
        }
    }

    /// Start the transcript with a finalized assistant greeting
    pub fn with_greeting(mut self, greeting: &str) -> Self {
        self.append_final_assistant(greeting.to_string());
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The assistant message currently receiving fragments, if any
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.streaming)
    }

    /// Apply one event.
    ///
    /// Returns the id of the message created by the event, if it created one.
    pub fn apply(&mut self, event: TranscriptEvent) -> Result<Option<MessageId>, TranscriptError> {
        match event {
            TranscriptEvent::AppendUserMessage { text, attachments } => {
                Ok(Some(self.append_user_message(text, attachments)))
            }
            TranscriptEvent::BeginAssistantMessage => self.begin_assistant_message().map(Some),
            TranscriptEvent::AppendFragment { id, delta } => {
                self.append_fragment(id, &delta);
                Ok(None)
            }
            TranscriptEvent::FinalizeMessage { id } => {
                self.finalize_message(id);
                Ok(None)
            }
            TranscriptEvent::AppendErrorMessage { text } => Ok(Some(self.append_final_assistant(text))),
            TranscriptEvent::Clear => {
                self.clear();
                Ok(None)
            }
        }
    }

    pub fn append_user_message(&mut self, text: String, attachments: Vec<Attachment>) -> MessageId {
        self.push(Role::User, text, false, attachments)
    }

    pub fn begin_assistant_message(&mut self) -> Result<MessageId, TranscriptError> {
        if let Some(pending) = self.streaming_message() {
            return Err(TranscriptError::AlreadyStreaming(pending.id));
        }
        Ok(self.push(Role::Assistant, String::new(), true, Vec::new()))
    }

    /// Append `delta` to the streaming message `id`.
    ///
    /// Returns false (and changes nothing) when no streaming message has that
    /// id, e.g. a late fragment arriving after a clear.
    pub fn append_fragment(&mut self, id: MessageId, delta: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id && m.streaming) {
            Some(message) => {
                message.text.push_str(delta);
                true
            }
            None => false,
        }
    }

    pub fn finalize_message(&mut self, id: MessageId) {
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
            message.streaming = false;
        }
    }

    /// Drop every message. The id sequence keeps counting so pre-clear ids
    /// never match a newer message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn append_final_assistant(&mut self, text: String) -> MessageId {
        self.push(Role::Assistant, text, false, Vec::new())
    }

    fn push(
        &mut self,
        role: Role,
        text: String,
        streaming: bool,
        attachments: Vec<Attachment>,
    ) -> MessageId {
        let created_at = Utc::now();
        let id = self.next_id(&created_at);
        self.messages.push(Message {
            id,
            role,
            text,
            created_at,
            streaming,
            attachments,
        });
        id
    }

    fn next_id(&mut self, at: &DateTime<Utc>) -> MessageId {
        let millis = u64::try_from(at.timestamp_millis()).unwrap_or(0);
        self.last_id = millis.max(self.last_id + 1);
        MessageId(self.last_id)
    }
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}
