//! Chat controller
//!
//! The [`ChatController`] drives one conversation. For each turn it:
//! 1. Validates the input and appends the user message
//! 2. Creates the session on first use (and again after a failed attempt)
//! 3. Opens a streaming assistant message and feeds it every fragment
//! 4. Finalizes the message, or appends a fixed error reply on failure
//!
//! Turns are serialized: a second turn while one is outstanding is rejected.
//! [`ChatController::reset`] may be called at any time, including mid-turn;
//! the outstanding turn then stops consuming its stream and the session is
//! discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::prompts_builtin;
use crate::conversation::{Message, MessageId, Transcript, TranscriptError, TranscriptEvent};

use super::attachment::{Attachment, EncodingError};
use super::session::{ConversationSession, SessionError, SessionManager};

/// Progress of a turn, in the order it happens
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    User { message: Message },
    AssistantStarted { id: MessageId },
    Fragment { id: MessageId, delta: String },
    Finalized { id: MessageId, text: String },
    /// The turn failed; `message` is the synthetic reply that was appended
    Failed { message: Message },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Failed,
    /// The conversation was reset while the turn was running
    Abandoned,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message has no text and no attachments")]
    EmptyTurn,

    #[error("A turn is already in progress")]
    TurnInProgress,

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Transcript(#[from] TranscriptError),
}

/// Per-conversation settings
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub system_instruction: String,
    pub greeting: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            system_instruction: prompts_builtin::SYSTEM_INSTRUCTION.to_string(),
            greeting: Some(prompts_builtin::GREETING.to_string()),
        }
    }
}

pub struct ChatController {
    manager: SessionManager,
    settings: ChatSettings,
    /// Held for the whole turn. The session is tagged with the epoch it
    /// was parked under and is only reused while that epoch is current.
    session: AsyncMutex<Option<(u64, ConversationSession)>>,
    transcript: Mutex<Transcript>,
    /// Bumped by every reset, only while the transcript lock is held
    epoch: AtomicU64,
}

impl ChatController {
    pub fn new(manager: SessionManager, settings: ChatSettings) -> Self {
        let transcript = match &settings.greeting {
            Some(greeting) => Transcript::new().with_greeting(greeting),
            None => Transcript::new(),
        };

        Self {
            manager,
            settings,
            session: AsyncMutex::new(None),
            transcript: Mutex::new(transcript),
            epoch: AtomicU64::new(0),
        }
    }

    /// Snapshot of the transcript
    pub fn transcript(&self) -> Transcript {
        self.with_transcript(|t| t.clone())
    }

    /// Whether a turn is currently outstanding
    pub fn is_busy(&self) -> bool {
        self.session.try_lock().is_err()
    }

    /// Clear the transcript and discard the session.
    pub fn reset(&self) {
        self.with_transcript(|t| {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            t.clear();
        });

        // An outstanding turn holds the lock and drops the session itself
        if let Ok(mut session) = self.session.try_lock() {
            *session = None;
        }
        info!("Conversation reset");
    }

    /// Run one turn, reporting progress through `on_event`.
    ///
    /// Errors are only returned for input problems, before the transcript is
    /// touched. Gateway failures end up in the transcript and are reported as
    /// [`TurnOutcome::Failed`].
    pub async fn send(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
        mut on_event: impl FnMut(TurnEvent) + Send,
    ) -> Result<TurnOutcome, ChatError> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(ChatError::EmptyTurn);
        }
        for attachment in &attachments {
            attachment.decode()?;
        }

        let mut slot = self
            .session
            .try_lock()
            .map_err(|_| ChatError::TurnInProgress)?;

        let (epoch, user) = self.with_transcript(|t| {
            let id = t.append_user_message(text.to_string(), attachments.clone());
            (self.epoch.load(Ordering::SeqCst), t.get(id).cloned())
        });
        if let Some(message) = user {
            on_event(TurnEvent::User { message });
        }

        let parked = slot
            .take()
            .filter(|(parked_epoch, _)| *parked_epoch == epoch)
            .map(|(_, session)| session);
        let session = match parked {
            Some(session) => session,
            None => match self
                .manager
                .create_session(self.settings.system_instruction.as_str())
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    warn!(error = %e, "Could not create chat session");
                    return Ok(self.fail(None, epoch, &mut on_event));
                }
            },
        };

        let begun = self.with_current(epoch, |t| {
            // A turn whose future was dropped can leave a message pending
            if let Some(stale) = t.streaming_message().map(|m| m.id) {
                t.finalize_message(stale);
            }
            t.begin_assistant_message()
        });
        let assistant_id = match begun {
            Some(id) => id?,
            None => return Ok(TurnOutcome::Abandoned),
        };
        on_event(TurnEvent::AssistantStarted { id: assistant_id });

        let result = self
            .stream_reply(&session, text, &attachments, assistant_id, epoch, &mut on_event)
            .await;

        let outcome = match result {
            Ok(TurnOutcome::Completed) => {
                let finalized = self.with_current(epoch, |t| {
                    t.finalize_message(assistant_id);
                    t.get(assistant_id).map(|m| m.text.clone())
                });
                match finalized {
                    Some(text) => {
                        if let Some(text) = text {
                            on_event(TurnEvent::Finalized { id: assistant_id, text });
                        }
                        TurnOutcome::Completed
                    }
                    None => TurnOutcome::Abandoned,
                }
            }
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Chat turn failed");
                self.fail(Some(assistant_id), epoch, &mut on_event)
            }
        };

        if outcome == TurnOutcome::Abandoned {
            debug!(handle = session.handle(), "Discarding session after reset");
        } else {
            *slot = Some((epoch, session));
        }

        Ok(outcome)
    }

    async fn stream_reply(
        &self,
        session: &ConversationSession,
        text: &str,
        attachments: &[Attachment],
        id: MessageId,
        epoch: u64,
        on_event: &mut (impl FnMut(TurnEvent) + Send),
    ) -> Result<TurnOutcome, SessionError> {
        let mut stream = self.manager.send_turn(session, text, attachments).await?;

        while let Some(item) = stream.next().await {
            let fragment = item?;
            match self.with_current(epoch, |t| t.append_fragment(id, &fragment.delta)) {
                None => return Ok(TurnOutcome::Abandoned),
                Some(true) => on_event(TurnEvent::Fragment {
                    id,
                    delta: fragment.delta,
                }),
                Some(false) => {}
            }
        }

        Ok(TurnOutcome::Completed)
    }

    /// Freeze the pending reply (keeping what arrived) and append the error reply
    fn fail(
        &self,
        pending: Option<MessageId>,
        epoch: u64,
        on_event: &mut (impl FnMut(TurnEvent) + Send),
    ) -> TurnOutcome {
        let appended = self.with_current(epoch, |t| {
            if let Some(id) = pending {
                t.finalize_message(id);
            }
            let id = t
                .apply(TranscriptEvent::AppendErrorMessage {
                    text: prompts_builtin::STREAM_ERROR.to_string(),
                })
                .ok()
                .flatten()?;
            t.get(id).cloned()
        });

        match appended {
            Some(message) => {
                if let Some(message) = message {
                    on_event(TurnEvent::Failed { message });
                }
                TurnOutcome::Failed
            }
            None => TurnOutcome::Abandoned,
        }
    }

    fn with_transcript<R>(&self, f: impl FnOnce(&mut Transcript) -> R) -> R {
        let mut transcript = self.transcript.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut transcript)
    }

    /// Like [`Self::with_transcript`], unless a reset happened since `epoch`
    fn with_current<R>(&self, epoch: u64, f: impl FnOnce(&mut Transcript) -> R) -> Option<R> {
        self.with_transcript(|t| (self.epoch.load(Ordering::SeqCst) == epoch).then(|| f(t)))
    }
}

/// Chat controllers by conversation id, created on first use
pub struct ChatRegistry {
    manager: SessionManager,
    settings: ChatSettings,
    chats: RwLock<HashMap<Uuid, Arc<ChatController>>>,
}

impl ChatRegistry {
    pub fn new(manager: SessionManager, settings: ChatSettings) -> Self {
        Self {
            manager,
            settings,
            chats: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: &Uuid) -> Option<Arc<ChatController>> {
        self.chats.read().await.get(id).cloned()
    }

    pub async fn get_or_create(&self, id: Uuid) -> Arc<ChatController> {
        if let Some(chat) = self.get(&id).await {
            return chat;
        }

        self.chats
            .write()
            .await
            .entry(id)
            .or_insert_with(|| {
                debug!(%id, "Opening conversation");
                Arc::new(ChatController::new(
                    self.manager.clone(),
                    self.settings.clone(),
                ))
            })
            .clone()
    }

    /// Reset and forget a conversation
    pub async fn remove(&self, id: &Uuid) -> bool {
        match self.chats.write().await.remove(id) {
            Some(chat) => {
                chat.reset();
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.chats.read().await.len()
    }
}
