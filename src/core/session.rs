//! Conversation sessions with the remote model
//!
//! A [`ConversationSession`] is the context handle for one dialogue: its
//! system instruction, the model it talks to and the turn history replayed on
//! every request. [`SessionManager::send_turn`] sends one turn and hands back
//! the reply as a lazy stream of [`Fragment`]s.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::providers::{ChunkStream, Content, Gateway, GenerateContentRequest, Part, ProviderError};

use super::attachment::{Attachment, EncodingError};

/// One incremental piece of the assistant's reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    pub delta: String,
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<Fragment, SessionError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to create session: {0}")]
    Creation(#[source] ProviderError),

    #[error("Stream failed: {0}")]
    Stream(#[source] ProviderError),

    #[error("Session is busy with another turn")]
    Busy,

    #[error("Turn has no text and no attachments")]
    EmptyTurn,

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// A dialogue with the remote model
#[derive(Debug)]
pub struct ConversationSession {
    handle: String,
    model: String,
    system_instruction: String,
    created_at: DateTime<Utc>,
    history: Arc<Mutex<Vec<Content>>>,
    busy: Arc<AtomicBool>,
}

impl ConversationSession {
    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_instruction(&self) -> &str {
        &self.system_instruction
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether a turn is currently outstanding
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Number of completed history entries (two per finished turn)
    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }
}

/// Clears the session's busy flag when the turn's stream goes away,
/// whether it finished, failed or was dropped half way.
struct TurnGuard {
    flag: Arc<AtomicBool>,
}

impl TurnGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, SessionError> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| SessionError::Busy)?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct SessionManager {
    gateway: Arc<dyn Gateway>,
}

impl SessionManager {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub async fn create_session(
        &self,
        system_instruction: impl Into<String>,
    ) -> Result<ConversationSession, SessionError> {
        let system_instruction = system_instruction.into();
        let handle = self
            .gateway
            .open_session(&system_instruction)
            .await
            .map_err(SessionError::Creation)?;

        info!(%handle, model = self.gateway.model(), "Created conversation session");

        Ok(ConversationSession {
            handle,
            model: self.gateway.model().to_string(),
            system_instruction,
            created_at: Utc::now(),
            history: Arc::new(Mutex::new(Vec::new())),
            busy: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Send one turn and stream the reply.
    ///
    /// The session stays busy until the returned stream ends, fails or is
    /// dropped; a second call in the meantime gets [`SessionError::Busy`].
    /// Only a fully delivered reply is added to the session history.
    pub async fn send_turn(
        &self,
        session: &ConversationSession,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<FragmentStream, SessionError> {
        let guard = TurnGuard::acquire(&session.busy)?;

        let turn = Content::user(build_parts(text, attachments)?);

        let mut contents = session.history.lock().await.clone();
        contents.push(turn.clone());

        let request = GenerateContentRequest {
            contents,
            system_instruction: Some(Content::instruction(session.system_instruction.as_str())),
            generation_config: None,
        };

        debug!(
            handle = %session.handle,
            attachments = attachments.len(),
            "Sending turn"
        );

        let chunks = self
            .gateway
            .stream_content(request)
            .await
            .map_err(SessionError::Stream)?;

        Ok(Box::pin(fragments(
            chunks,
            guard,
            turn,
            session.history.clone(),
        )))
    }
}

/// Attachments first, then the text if there is any
fn build_parts(text: &str, attachments: &[Attachment]) -> Result<Vec<Part>, SessionError> {
    let mut parts = Vec::with_capacity(attachments.len() + 1);

    for attachment in attachments {
        // Reject payloads the API would choke on before anything is sent
        attachment.decode()?;
        parts.push(Part::inline_data(
            attachment.mime_type.as_str(),
            attachment.payload(),
        ));
    }

    if !text.is_empty() {
        parts.push(Part::text(text));
    }

    if parts.is_empty() {
        return Err(SessionError::EmptyTurn);
    }

    Ok(parts)
}

fn fragments(
    mut chunks: ChunkStream,
    guard: TurnGuard,
    turn: Content,
    history: Arc<Mutex<Vec<Content>>>,
) -> impl Stream<Item = Result<Fragment, SessionError>> + Send {
    try_stream! {
        let _guard = guard;
        let mut reply = String::new();

        while let Some(chunk) = chunks.next().await {
            let delta = chunk.map_err(SessionError::Stream)?.text.unwrap_or_default();
            reply.push_str(&delta);
            yield Fragment { delta };
        }

        let mut history = history.lock().await;
        history.push(turn);
        history.push(Content::model(reply));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{MockGateway, ScriptedStream};

    async fn collect(stream: FragmentStream) -> (Vec<String>, Option<SessionError>) {
        let mut deltas = Vec::new();
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => deltas.push(fragment.delta),
                Err(e) => return (deltas, Some(e)),
            }
        }
        (deltas, None)
    }

    #[tokio::test]
    async fn test_create_session() {
        let gateway = Arc::new(MockGateway::new());
        let manager = SessionManager::new(gateway.clone());

        let session = manager.create_session("Be a coach").await.unwrap();
        assert_eq!(session.system_instruction(), "Be a coach");
        assert_eq!(session.model(), "mock-model");
        assert!(!session.handle().is_empty());
        assert!(!session.is_busy());
        assert_eq!(gateway.opened.lock().unwrap().as_slice(), ["Be a coach"]);
    }

    #[tokio::test]
    async fn test_create_session_failure() {
        let manager = SessionManager::new(Arc::new(MockGateway::new().failing_opens(1)));

        let err = manager.create_session("Be a coach").await.unwrap_err();
        assert!(matches!(err, SessionError::Creation(_)));

        // a later attempt is free to succeed
        assert!(manager.create_session("Be a coach").await.is_ok());
    }

    #[tokio::test]
    async fn test_turn_parts_order() {
        let gateway = Arc::new(MockGateway::new());
        let manager = SessionManager::new(gateway.clone());
        let session = manager.create_session("Be a coach").await.unwrap();

        let attachments = vec![
            Attachment::encode("a.png", "image/png", b"png bytes"),
            Attachment {
                name: "b.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                data: "cGRm".to_string(),
            },
        ];

        let stream = manager
            .send_turn(&session, "Explain these", &attachments)
            .await
            .unwrap();
        collect(stream).await;

        let request = gateway.last_request();
        assert_eq!(
            request.system_instruction,
            Some(Content::instruction("Be a coach"))
        );
        assert_eq!(
            request.contents,
            vec![Content::user(vec![
                Part::inline_data("image/png", attachments[0].payload()),
                Part::inline_data("application/pdf", "cGRm"),
                Part::text("Explain these"),
            ])]
        );
        assert!(!attachments[0].payload().starts_with("data:"));
    }

    #[tokio::test]
    async fn test_attachment_only_turn_has_no_text_part() {
        let gateway = Arc::new(MockGateway::new());
        let manager = SessionManager::new(gateway.clone());
        let session = manager.create_session("Be a coach").await.unwrap();

        let attachment = Attachment::encode("a.png", "image/png", b"png");
        let stream = manager.send_turn(&session, "", &[attachment]).await.unwrap();
        collect(stream).await;

        let parts = &gateway.last_request().contents[0].parts;
        assert_eq!(parts.len(), 1);
        assert!(matches!(parts[0], Part::InlineData { .. }));
    }

    #[tokio::test]
    async fn test_empty_turn_rejected() {
        let gateway = Arc::new(MockGateway::new());
        let manager = SessionManager::new(gateway.clone());
        let session = manager.create_session("Be a coach").await.unwrap();

        let result = manager.send_turn(&session, "", &[]).await;
        assert!(matches!(result, Err(SessionError::EmptyTurn)));
        assert!(gateway.requests.lock().unwrap().is_empty());
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_bad_attachment_rejected_before_sending() {
        let gateway = Arc::new(MockGateway::new());
        let manager = SessionManager::new(gateway.clone());
        let session = manager.create_session("Be a coach").await.unwrap();

        let broken = Attachment {
            name: "x.png".to_string(),
            mime_type: "image/png".to_string(),
            data: "data:image/png;base64,%%%".to_string(),
        };
        let result = manager.send_turn(&session, "look", &[broken]).await;
        assert!(matches!(result, Err(SessionError::Encoding(_))));
        assert!(gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_chunks_do_not_end_stream() {
        let gateway = MockGateway::new().with_stream(ScriptedStream::Chunks(vec![
            Some("Entropy "),
            None,
            Some(""),
            Some("is a measure "),
            Some("of disorder."),
        ]));
        let manager = SessionManager::new(Arc::new(gateway));
        let session = manager.create_session("Be a coach").await.unwrap();

        let stream = manager.send_turn(&session, "What is entropy?", &[]).await.unwrap();
        let (deltas, err) = collect(stream).await;

        assert!(err.is_none());
        assert_eq!(deltas.len(), 5);
        assert_eq!(deltas.concat(), "Entropy is a measure of disorder.");
    }

    #[tokio::test]
    async fn test_history_grows_only_on_success() {
        let gateway = Arc::new(
            MockGateway::new()
                .with_stream(ScriptedStream::Chunks(vec![Some("Hi!")]))
                .with_stream(ScriptedStream::FailAfter(vec![Some("Hello")]))
                .with_stream(ScriptedStream::Chunks(vec![Some("Again")])),
        );
        let manager = SessionManager::new(gateway.clone());
        let session = manager.create_session("Be a coach").await.unwrap();

        let (_, err) = collect(manager.send_turn(&session, "one", &[]).await.unwrap()).await;
        assert!(err.is_none());
        assert_eq!(session.history_len().await, 2);

        let (deltas, err) = collect(manager.send_turn(&session, "two", &[]).await.unwrap()).await;
        assert_eq!(deltas, vec!["Hello"]);
        assert!(matches!(err, Some(SessionError::Stream(_))));
        assert_eq!(session.history_len().await, 2);
        assert!(!session.is_busy());

        collect(manager.send_turn(&session, "three", &[]).await.unwrap()).await;
        let contents = gateway.last_request().contents;
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0], Content::user(vec![Part::text("one")]));
        assert_eq!(contents[1], Content::model("Hi!"));
        assert_eq!(contents[2], Content::user(vec![Part::text("three")]));
    }

    #[tokio::test]
    async fn test_overlapping_turn_rejected() {
        let gateway = MockGateway::new()
            .with_stream(ScriptedStream::Chunks(vec![Some("a"), Some("b")]))
            .with_stream(ScriptedStream::Chunks(vec![Some("c")]));
        let manager = SessionManager::new(Arc::new(gateway));
        let session = manager.create_session("Be a coach").await.unwrap();

        let first = manager.send_turn(&session, "first", &[]).await.unwrap();
        assert!(session.is_busy());

        let second = manager.send_turn(&session, "second", &[]).await;
        assert!(matches!(second, Err(SessionError::Busy)));

        // abandoning the first stream frees the session
        drop(first);
        assert!(!session.is_busy());
        let third = manager.send_turn(&session, "third", &[]).await.unwrap();
        let (deltas, _) = collect(third).await;
        assert_eq!(deltas, vec!["c"]);
    }

    #[tokio::test]
    async fn test_rejected_request_is_stream_error() {
        let gateway = MockGateway::new().with_stream(ScriptedStream::Reject);
        let manager = SessionManager::new(Arc::new(gateway));
        let session = manager.create_session("Be a coach").await.unwrap();

        let result = manager.send_turn(&session, "hello", &[]).await;
        assert!(matches!(result, Err(SessionError::Stream(_))));
        assert!(!session.is_busy());
    }
}
