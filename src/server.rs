use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Json, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::quiz::ai_helper::{GenerationError, QuestionStream, QuizGenerator};
use crate::quiz::stream::collect_questions;
use crate::quiz::upload::{GenerationRequest, InputError, MAX_FILE_BYTES};
use crate::quiz::Question;

/// Base64 grows the file by a third; the rest is room for the JSON envelope.
const MAX_REQUEST_BYTES: usize = MAX_FILE_BYTES / 3 * 4 + 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<QuizGenerator>,
    pub api_key_exists: bool,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "PDF quiz generator" }))
        .route("/api/generate-quiz", post(generate_quiz))
        .route("/api/generate-quiz-simple", post(generate_quiz_simple))
        .route("/api/test-api", get(test_api))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("Listening on {}", addr);
    axum::serve(listener, router(state)).await
}

impl GenerationError {
    fn status(&self) -> StatusCode {
        match self {
            GenerationError::Input(InputError::UnsupportedType(_)) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            GenerationError::Input(InputError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            GenerationError::Input(InputError::UnreadablePdf(_) | InputError::NoText) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            GenerationError::Input(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GenerationError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Quiz generation failed: {}", self);
        } else {
            log::warn!("Rejected generation request: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

/// Streams one validated question per line; a failure becomes a final
/// `{"error": ...}` line. A failure before the first question still gets an
/// error status.
async fn generate_quiz(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Response, GenerationError> {
    log::info!(
        "POST /api/generate-quiz: {} file(s), {} questions",
        request.files.len(),
        request.number_of_questions
    );
    let (upload, requested) = request.into_upload()?;
    let mut questions = state.generator.generate(upload, requested).await?;
    let first = match questions.next().await {
        Some(Err(e)) => return Err(e),
        first => first,
    };
    let questions = stream::iter(first).chain(questions).boxed();

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(ndjson_lines(questions)),
    )
        .into_response())
}

async fn generate_quiz_simple(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> Result<Json<Vec<Question>>, GenerationError> {
    let (upload, requested) = request.into_upload()?;
    let questions = state.generator.generate(upload, requested).await?;
    let questions = collect_questions(questions, requested).await?;
    log::info!("Generated {} questions", questions.len());
    Ok(Json(questions))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiCheck {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    api_key_exists: bool,
}

async fn test_api(State(state): State<AppState>) -> (StatusCode, Json<ApiCheck>) {
    log::info!("Testing model API, key present: {}", state.api_key_exists);
    match state.generator.check_api().await {
        Ok(text) => (
            StatusCode::OK,
            Json(ApiCheck {
                success: true,
                text: Some(text),
                error: None,
                api_key_exists: state.api_key_exists,
            }),
        ),
        Err(e) => {
            log::error!("Model API check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiCheck {
                    success: false,
                    text: None,
                    error: Some(e.to_string()),
                    api_key_exists: state.api_key_exists,
                }),
            )
        }
    }
}

fn ndjson_lines(questions: QuestionStream) -> impl Stream<Item = Result<String, Infallible>> {
    questions.map(|item| {
        let line = match item.and_then(|question| {
            serde_json::to_string(&question).map_err(|e| GenerationError::Malformed(e.to_string()))
        }) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Quiz generation failed mid-stream: {}", e);
                serde_json::json!({ "error": e.to_string() }).to_string()
            }
        };
        Ok(line + "\n")
    })
}
