//! Route handlers and the error-to-status mapping.
//!
//! Handlers never expose the answer key: sessions leave as
//! [`SessionView`] with [`ClientQuestion`]s, and the key only surfaces
//! inside the graded result after submission.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::coordinator::generation_lock::GenerationStatus;
use crate::coordinator::generator::GenerateRequest;
use crate::coordinator::recovery::RecoveryOutcome;
use crate::coordinator::session::SessionCoordinator;
use crate::models::material::MaterialRef;
use crate::models::progress::ProgressSnapshot;
use crate::models::question::ClientQuestion;
use crate::models::result::QuizResult;
use crate::models::session::{QuizSession, SessionState};
use crate::AppError;

/// Client-safe session payload: the answer key is stripped.
#[derive(Debug, Serialize)]
pub struct SessionView {
    /// Session identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Source material.
    pub material: MaterialRef,
    /// Lifecycle state.
    pub state: SessionState,
    /// Questions with answers withheld.
    pub questions: Vec<ClientQuestion>,
    /// Countdown budget in seconds.
    pub duration_seconds: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Latest checkpoint, when one exists.
    pub progress: Option<ProgressSnapshot>,
}

impl SessionView {
    fn new(session: QuizSession, progress: Option<ProgressSnapshot>) -> Self {
        Self {
            id: session.id,
            user_id: session.user_id,
            material: session.material,
            state: session.state,
            questions: session.questions.iter().map(ClientQuestion::from).collect(),
            duration_seconds: session.duration_seconds,
            created_at: session.created_at,
            progress,
        }
    }
}

/// Body for `POST /api/quiz/answer`.
#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    /// Target session.
    pub session_id: String,
    /// Question index being answered.
    pub index: u32,
    /// Selected option index.
    pub option: u32,
}

/// Body for `POST /api/quiz/navigate`.
#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    /// Target session.
    pub session_id: String,
    /// Question index to move to.
    pub index: u32,
}

/// Body for `POST /api/quiz/submit`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// Target session.
    pub session_id: String,
    /// Selected option per question; the unanswered sentinel (-1) or a
    /// short vector leaves questions unanswered.
    pub answers: Vec<i32>,
}

/// Body for endpoints keyed by user.
#[derive(Debug, Deserialize)]
pub struct UserRequest {
    /// Target user.
    pub user_id: String,
}

/// Body for `POST /api/quiz/checkpoint`.
#[derive(Debug, Deserialize)]
pub struct CheckpointRequest {
    /// Target session.
    pub session_id: String,
}

/// Client-facing recovery outcome.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryView {
    /// A live attempt was restored.
    Resumed {
        /// The restored session.
        session: SessionView,
    },
    /// An outstanding generation resolved into a fresh session.
    Attached {
        /// The newly activated session.
        session: SessionView,
    },
    /// The attempt had already ended; it was finalized from its
    /// checkpoint during recovery.
    Finalized {
        /// The graded result.
        result: QuizResult,
    },
    /// The material is gone; the client must re-select.
    StaleContent,
    /// Nothing to recover.
    Fresh,
}

/// Wrapper making [`AppError`] an axum response.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::LockConflict(_) | AppError::Submission(_) => StatusCode::CONFLICT,
            AppError::StaleContent(_) => StatusCode::GONE,
            AppError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Config(_) | AppError::Db(_) | AppError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the API router over a shared coordinator.
pub fn router(coordinator: Arc<SessionCoordinator>) -> Router {
    Router::new()
        .route("/api/quiz/generate", post(generate))
        .route("/api/quiz/status/{user_id}", get(status))
        .route("/api/quiz/session/{session_id}", get(session))
        .route("/api/quiz/answer", post(answer))
        .route("/api/quiz/navigate", post(navigate))
        .route("/api/quiz/checkpoint", post(checkpoint))
        .route("/api/quiz/submit", post(submit))
        .route("/api/quiz/recover", post(recover))
        .route("/api/quiz/reset", post(reset))
        .route("/health", get(health))
        .with_state(coordinator)
}

async fn health() -> &'static str {
    "ok"
}

async fn generate(
    State(coordinator): State<Arc<SessionCoordinator>>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<(StatusCode, Json<SessionView>)> {
    let session = coordinator.start_session(&request).await?;
    let progress = coordinator.progress(&session.id).await?;
    Ok((StatusCode::CREATED, Json(SessionView::new(session, progress))))
}

async fn status(
    State(coordinator): State<Arc<SessionCoordinator>>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<GenerationStatus>> {
    Ok(Json(coordinator.status(&user_id).await?))
}

async fn session(
    State(coordinator): State<Arc<SessionCoordinator>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let session = coordinator.session(&session_id).await?;
    let progress = coordinator.progress(&session_id).await?;
    Ok(Json(SessionView::new(session, progress)))
}

async fn answer(
    State(coordinator): State<Arc<SessionCoordinator>>,
    Json(request): Json<AnswerRequest>,
) -> ApiResult<Json<ProgressSnapshot>> {
    let snapshot = coordinator
        .set_answer(&request.session_id, request.index, request.option)
        .await?;
    Ok(Json(snapshot))
}

async fn navigate(
    State(coordinator): State<Arc<SessionCoordinator>>,
    Json(request): Json<NavigateRequest>,
) -> ApiResult<Json<ProgressSnapshot>> {
    let snapshot = coordinator
        .go_to_question(&request.session_id, request.index)
        .await?;
    Ok(Json(snapshot))
}

async fn checkpoint(
    State(coordinator): State<Arc<SessionCoordinator>>,
    Json(request): Json<CheckpointRequest>,
) -> ApiResult<StatusCode> {
    coordinator.checkpoint(&request.session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit(
    State(coordinator): State<Arc<SessionCoordinator>>,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<Json<QuizResult>> {
    let result = coordinator
        .submit(&request.session_id, &request.answers)
        .await?;
    Ok(Json(result))
}

async fn recover(
    State(coordinator): State<Arc<SessionCoordinator>>,
    Json(request): Json<UserRequest>,
) -> ApiResult<Json<RecoveryView>> {
    let view = match coordinator.recover(&request.user_id).await? {
        RecoveryOutcome::Resumed { session, snapshot } => RecoveryView::Resumed {
            session: SessionView::new(session, Some(snapshot)),
        },
        RecoveryOutcome::Attached { session } => {
            let progress = coordinator.progress(&session.id).await?;
            RecoveryView::Attached {
                session: SessionView::new(session, progress),
            }
        }
        RecoveryOutcome::Finalized { result } => RecoveryView::Finalized { result },
        RecoveryOutcome::StaleContent => RecoveryView::StaleContent,
        RecoveryOutcome::Fresh => RecoveryView::Fresh,
    };
    Ok(Json(view))
}

async fn reset(
    State(coordinator): State<Arc<SessionCoordinator>>,
    Json(request): Json<UserRequest>,
) -> ApiResult<StatusCode> {
    coordinator.reset(&request.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
