use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::{
    assets,
    config::Config,
    encoder::encode_photo,
    image_gen::{ImageBackend, ImageGenerator},
    models::{ApiKeyRequest, ChoiceOption, ColorTone, Field, InputsUpdate, Occasion, Season, Session, SessionView},
    openai::{DownloadError, OpenAiClient, OpenAiError},
    pipeline::{Pipeline, PipelineOutcome, SessionStore},
    recommendation::RecommendationGenerator,
};

const DOWNLOAD_DISPOSITION: &str = "attachment; filename=\"outfit_suggestion.png\"";

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub openai: OpenAiClient,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, OpenAiError> {
        Ok(Self {
            sessions: SessionStore::new(config.session_ttl),
            openai: OpenAiClient::new(&config)?,
            config: Arc::new(config),
        })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("session not found")]
    NotFound,
    #[error("OpenAI API key required")]
    MissingApiKey,
    #[error("a generation is already running for this session")]
    Busy,
    #[error("missing required field(s)")]
    Invalid(Vec<Field>),
    #[error("{0}")]
    TextFailed(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("no generated image")]
    NoImage,
    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound | Self::NoImage => StatusCode::NOT_FOUND,
            Self::MissingApiKey => StatusCode::UNAUTHORIZED,
            Self::Busy => StatusCode::CONFLICT,
            Self::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::TextFailed(_) | Self::Download(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        let body = match &self {
            Self::Invalid(missing) => json!({ "error": self.to_string(), "missing": missing }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);
    Router::new()
        .route("/", get(assets::index))
        .route("/static/*path", get(assets::static_file))
        .route("/api/config", get(get_config))
        .route("/api/session", post(create_session))
        .route("/api/session/:id", get(get_session))
        .route("/api/session/:id/inputs", put(update_inputs))
        .route("/api/session/:id/photo", post(upload_photo).delete(remove_photo).layer(upload_limit))
        .route("/api/session/:id/api-key", put(set_api_key))
        .route("/api/session/:id/generate", post(generate))
        .route("/api/session/:id/regenerate", post(regenerate))
        .route("/api/session/:id/image", get(download_image))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

fn options<T: Copy>(all: &[T], value: fn(T) -> &'static str, label: fn(T) -> &'static str) -> Vec<ChoiceOption> {
    all.iter().map(|&v| ChoiceOption { value: value(v), label: label(v) }).collect()
}

pub async fn get_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "api_key_configured": state.openai.has_api_key(),
        "seasons": options(&Season::ALL, Season::as_str, Season::label),
        "occasions": options(&Occasion::ALL, Occasion::as_str, Occasion::label),
        "color_tones": options(&ColorTone::ALL, ColorTone::as_str, ColorTone::label),
    }))
}

pub async fn create_session(State(state): State<AppState>) -> Json<SessionView> {
    let session = state.sessions.create();
    tracing::info!("🆕 Created session {}", session.id);
    Json(session.view())
}

pub async fn get_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    state.sessions.get(id).map(|s| Json(s.view())).ok_or(ApiError::NotFound)
}

pub async fn update_inputs(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<InputsUpdate>,
) -> Result<Json<SessionView>, ApiError> {
    state.sessions
        .update(id, |s| {
            s.inputs.apply(body);
            s.view()
        })
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn upload_photo(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SessionView>, ApiError> {
    let mut photo = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.to_string()))? {
        if field.name() == Some("photo") {
            photo = Some(field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?);
            break;
        }
    }
    let photo = photo.ok_or_else(|| ApiError::BadRequest("missing multipart field 'photo'".to_string()))?;
    let inline = encode_photo(&photo).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    tracing::info!("📷 Session {} photo uploaded ({}, {} bytes)", id, inline.mime_type, photo.len());

    state.sessions
        .update(id, |s| {
            s.inputs.photo = Some(photo);
            s.view()
        })
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn remove_photo(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<SessionView>, ApiError> {
    state.sessions
        .update(id, |s| {
            s.inputs.photo = None;
            s.view()
        })
        .map(Json)
        .ok_or(ApiError::NotFound)
}

pub async fn set_api_key(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<ApiKeyRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let key = body.api_key.trim().to_string();
    if key.is_empty() {
        return Err(ApiError::BadRequest("api_key must not be empty".to_string()));
    }
    state.sessions
        .update(id, |s| {
            s.api_key = Some(key);
            s.view()
        })
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// Session key wins over the process-wide one.
fn client_for(state: &AppState, session: &Session) -> Result<OpenAiClient, ApiError> {
    match &session.api_key {
        Some(key) => Ok(state.openai.with_api_key(key.clone())),
        None if state.openai.has_api_key() => Ok(state.openai.clone()),
        None => Err(ApiError::MissingApiKey),
    }
}

fn outcome_response(state: &AppState, id: Uuid, outcome: PipelineOutcome) -> Result<Json<SessionView>, ApiError> {
    match outcome {
        PipelineOutcome::NotFound => Err(ApiError::NotFound),
        PipelineOutcome::Busy => Err(ApiError::Busy),
        PipelineOutcome::Invalid(missing) => Err(ApiError::Invalid(missing)),
        PipelineOutcome::TextFailed(message) => Err(ApiError::TextFailed(message)),
        PipelineOutcome::Complete { image } => {
            if !image {
                tracing::warn!("⚠️ Session {} completed without an image", id);
            }
            state.sessions.get(id).map(|s| Json(s.view())).ok_or(ApiError::NotFound)
        }
    }
}

/// Folds inputs sent along with a generate request into the session, so a value the
/// browser has not saved yet is not reported as missing. Ignored while a run is in flight.
fn apply_pending_inputs(state: &AppState, id: Uuid, body: Option<Json<InputsUpdate>>) -> Result<Session, ApiError> {
    if let Some(Json(update)) = body {
        state.sessions.update(id, |s| {
            if !s.stage.is_generating() {
                s.inputs.apply(update);
            }
        });
    }
    state.sessions.get(id).ok_or(ApiError::NotFound)
}

pub async fn generate(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    body: Option<Json<InputsUpdate>>,
) -> Result<Json<SessionView>, ApiError> {
    let session = apply_pending_inputs(&state, id, body)?;
    let client = client_for(&state, &session)?;
    let text = RecommendationGenerator::new(client.clone(), &state.config);
    let image = ImageGenerator::new(client, &state.config);

    let outcome = Pipeline::new(&text, &image).run(&state.sessions, id).await;
    outcome_response(&state, id, outcome)
}

pub async fn regenerate(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    body: Option<Json<InputsUpdate>>,
) -> Result<Json<SessionView>, ApiError> {
    let session = apply_pending_inputs(&state, id, body)?;
    let client = client_for(&state, &session)?;
    let text = RecommendationGenerator::new(client.clone(), &state.config);
    let image = ImageGenerator::new(client, &state.config);

    tracing::info!("🔄 Regenerating session {}", id);
    let outcome = Pipeline::new(&text, &image).regenerate(&state.sessions, id).await;
    outcome_response(&state, id, outcome)
}

pub async fn download_image(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, ApiError> {
    let session = state.sessions.get(id).ok_or(ApiError::NotFound)?;
    let image = session.image.ok_or(ApiError::NoImage)?;

    let bytes = match image.bytes {
        Some(bytes) => bytes,
        None => {
            let downloader = ImageGenerator::new(state.openai.clone(), &state.config);
            match downloader.download(&image.url).await {
                Ok(bytes) => {
                    state.sessions.update(id, |s| {
                        if let Some(current) = s.image.as_mut().filter(|i| i.url == image.url) {
                            current.bytes = Some(bytes.clone());
                        }
                    });
                    bytes
                }
                Err(e) => {
                    state.sessions.update(id, |s| {
                        if let Some(current) = s.image.as_mut().filter(|i| i.url == image.url) {
                            current.download_failed = true;
                        }
                    });
                    return Err(e.into());
                }
            }
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_static(DOWNLOAD_DISPOSITION),
    );
    Ok((StatusCode::OK, headers, bytes).into_response())
}
