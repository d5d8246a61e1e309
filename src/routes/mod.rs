//! API routes

use async_stream::stream;
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::require_auth;
use crate::conversation::Transcript;
use crate::core::{Attachment, ChatError, Flashcard, StudyPlanItem, TurnEvent};
use crate::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    pub notes: String,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
}

#[derive(Debug, Deserialize)]
pub struct FlashcardsRequest {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Deserialize)]
pub struct StudyPlanRequest {
    pub goals: String,
}

#[derive(Debug, Serialize)]
pub struct MotivationResponse {
    pub quote: String,
}

/// Error body for failed requests
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(error: ChatError) -> Self {
        let status = match error {
            ChatError::TurnInProgress => StatusCode::CONFLICT,
            ChatError::EmptyTurn | ChatError::Encoding(_) => StatusCode::BAD_REQUEST,
            ChatError::Transcript(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let token = state
        .auth
        .write()
        .await
        .login(&request.email, &request.password)
        .map_err(|e| ApiError::new(StatusCode::UNAUTHORIZED, e.to_string()))?;

    Ok(Json(LoginResponse { token }))
}

async fn logout(State(state): State<AppState>) -> StatusCode {
    state.auth.write().await.logout();
    StatusCode::NO_CONTENT
}

async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transcript>, ApiError> {
    match state.chats.get(&id).await {
        Some(chat) => Ok(Json(chat.transcript())),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "conversation not found")),
    }
}

async fn delete_chat(State(state): State<AppState>, Path(id): Path<Uuid>) -> StatusCode {
    if state.chats.remove(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Run a turn and stream its events as SSE.
///
/// The turn runs in its own task so it finishes (and leaves the transcript
/// consistent) even if the client goes away.
async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let chat = state.chats.get_or_create(id).await;
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<TurnEvent, ChatError>>();

    tokio::spawn(async move {
        let events = tx.clone();
        let result = chat
            .send(&request.text, request.attachments, move |event| {
                let _ = events.send(Ok(event));
            })
            .await;

        match result {
            Ok(outcome) => debug!(conversation = %id, ?outcome, "Turn finished"),
            Err(e) => {
                let _ = tx.send(Err(e));
            }
        }
    });

    // Input errors arrive before any event
    let first = match rx.recv().await {
        Some(Ok(event)) => event,
        Some(Err(e)) => return Err(e.into()),
        None => {
            warn!(conversation = %id, "Turn ended without events");
            return Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "turn aborted"));
        }
    };

    let events = stream! {
        yield Event::default().json_data(&first);
        while let Some(Ok(event)) = rx.recv().await {
            yield Event::default().json_data(&event);
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Encode uploaded files as attachments for a later turn
async fn upload_attachments(mut multipart: Multipart) -> Result<Json<Vec<Attachment>>, ApiError> {
    let mut attachments = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_upload)? {
        let name = field
            .file_name()
            .or_else(|| field.name())
            .unwrap_or("attachment")
            .to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(bad_upload)?;

        let attachment = Attachment::from_upload(name, content_type.as_deref(), &bytes);
        debug!(
            name = %attachment.name,
            mime = %attachment.mime_type,
            image = attachment.is_image(),
            "Encoded attachment"
        );
        attachments.push(attachment);
    }

    if attachments.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "no files uploaded"));
    }
    Ok(Json(attachments))
}

fn bad_upload(error: MultipartError) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, error.to_string())
}

async fn summarize(
    State(state): State<AppState>,
    Json(request): Json<SummaryRequest>,
) -> Result<Json<SummaryResponse>, ApiError> {
    if request.notes.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "notes are empty"));
    }
    let summary = state.study.summarize_notes(&request.notes).await;
    Ok(Json(SummaryResponse { summary }))
}

async fn flashcards(
    State(state): State<AppState>,
    Json(request): Json<FlashcardsRequest>,
) -> Result<Json<Vec<Flashcard>>, ApiError> {
    if request.topic.trim().is_empty() && request.context.trim().is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "topic or context is required",
        ));
    }
    let cards = state
        .study
        .generate_flashcards(&request.topic, &request.context)
        .await;
    Ok(Json(cards))
}

async fn study_plan(
    State(state): State<AppState>,
    Json(request): Json<StudyPlanRequest>,
) -> Result<Json<Vec<StudyPlanItem>>, ApiError> {
    if request.goals.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "goals are empty"));
    }
    Ok(Json(state.study.generate_study_plan(&request.goals).await))
}

async fn motivation(State(state): State<AppState>) -> Json<MotivationResponse> {
    let quote = state.study.generate_motivation().await;
    Json(MotivationResponse { quote })
}

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/v1/auth/logout", post(logout))
        .route("/v1/chats/:id", get(get_chat).delete(delete_chat))
        .route("/v1/chats/:id/messages", post(send_message))
        .route("/v1/attachments", post(upload_attachments))
        .route("/v1/study/summary", post(summarize))
        .route("/v1/study/flashcards", post(flashcards))
        .route("/v1/study/plan", post(study_plan))
        .route("/v1/study/motivation", get(motivation))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/v1/auth/login", post(login))
        .merge(protected)
}
