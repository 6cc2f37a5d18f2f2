use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::{
    audio::AudioService,
    auth::{owner_id, require_verification, AuthService, VERIFICATION_COOKIE},
    errors::{ApiError, ErrorContext},
    lifecycle::{FetchOutcome, LifecycleCoordinator},
    models::*,
    record_service::RecordService,
    streaming::ndjson_response,
};

// Import logging macros
use crate::{log_api_start, log_api_success, log_api_warn};

#[derive(Clone)]
pub struct AppState {
    pub records: RecordService,
    pub lifecycle: LifecycleCoordinator,
    pub audio: AudioService,
    pub auth: AuthService,
}

#[derive(Deserialize)]
pub struct VerifyTurnstileRequest {
    pub token: Option<String>,
}

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// Record creation

async fn create_record(
    state: &AppState,
    jar: &CookieJar,
    kind: ResourceKind,
    request: CreatePhraseRequest,
) -> Result<Json<ApiResponse<CreatedRecord>>, (StatusCode, Json<ApiResponse<()>>)> {
    let operation = match kind {
        ResourceKind::Flashcards => "create_flashcards",
        ResourceKind::Quiz => "create_quiz",
    };
    log_api_start!(operation);

    let Some(phrase) = request.phrase else {
        let error = ApiError::ValidationError("phrase is required".to_string());
        return Err(error.to_response_with_context(ErrorContext::new(operation, kind.label())));
    };

    let owner = owner_id(jar, &state.auth);
    match state
        .records
        .create_or_reuse(kind, &phrase, owner.as_deref())
        .await
    {
        Ok(record) => {
            log_api_success!(operation, record_id = record.id, "record ready");
            Ok(Json(ApiResponse::success(CreatedRecord { id: record.id })))
        }
        Err(error) => Err(error.to_response_with_context(ErrorContext::new(operation, kind.label()))),
    }
}

pub async fn create_flashcards(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<CreatePhraseRequest>,
) -> Result<Json<ApiResponse<CreatedRecord>>, (StatusCode, Json<ApiResponse<()>>)> {
    create_record(&state, &jar, ResourceKind::Flashcards, request).await
}

pub async fn create_quiz(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<CreatePhraseRequest>,
) -> Result<Json<ApiResponse<CreatedRecord>>, (StatusCode, Json<ApiResponse<()>>)> {
    create_record(&state, &jar, ResourceKind::Quiz, request).await
}

// Fetch: serve the cached payload with 208, or start/attach to a generation

async fn fetch_record(
    state: &AppState,
    jar: &CookieJar,
    kind: ResourceKind,
    id: uuid::Uuid,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    let operation = match kind {
        ResourceKind::Flashcards => "fetch_flashcards",
        ResourceKind::Quiz => "fetch_quiz",
    };
    log_api_start!(operation, record_id = id);

    let owner = owner_id(jar, &state.auth);
    match state
        .lifecycle
        .fetch_or_generate(kind, id, owner.as_deref())
        .await
    {
        Ok(FetchOutcome::Cached(payload) | FetchOutcome::Promoted(payload)) => {
            log_api_success!(operation, record_id = id, "served stored payload");
            Ok((
                StatusCode::ALREADY_REPORTED,
                Json(ApiResponse::success(payload)),
            )
                .into_response())
        }
        Ok(FetchOutcome::Streaming(rx)) => {
            log_api_success!(operation, record_id = id, "generation stream attached");
            Ok(ndjson_response(rx))
        }
        Err(error) => {
            let context = ErrorContext::new(operation, kind.label()).with_id(&id.to_string());
            Err(error.to_response_with_context(context))
        }
    }
}

pub async fn fetch_flashcards(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<FetchFlashcardsRequest>,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    fetch_record(&state, &jar, ResourceKind::Flashcards, request.flashcards_id).await
}

pub async fn fetch_quiz(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<FetchQuizRequest>,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    fetch_record(&state, &jar, ResourceKind::Quiz, request.quiz_id).await
}

// History and review

fn require_owner(
    jar: &CookieJar,
    auth: &AuthService,
    operation: &str,
    resource: &str,
) -> Result<String, (StatusCode, Json<ApiResponse<()>>)> {
    owner_id(jar, auth).ok_or_else(|| {
        ApiError::Unauthorized.to_response_with_context(ErrorContext::new(operation, resource))
    })
}

async fn record_history(
    state: &AppState,
    jar: &CookieJar,
    kind: ResourceKind,
) -> Result<Json<ApiResponse<Vec<HistoryEntry>>>, (StatusCode, Json<ApiResponse<()>>)> {
    let operation = match kind {
        ResourceKind::Flashcards => "flashcards_history",
        ResourceKind::Quiz => "quiz_history",
    };
    let owner = require_owner(jar, &state.auth, operation, kind.label())?;

    match state.records.history(kind, &owner).await {
        Ok(entries) => {
            log_api_success!(operation, count = entries.len(), "history retrieved");
            Ok(Json(ApiResponse::success(entries)))
        }
        Err(e) => {
            let context = ErrorContext::new(operation, kind.label());
            Err(ApiError::DatabaseError(e).to_response_with_context(context))
        }
    }
}

pub async fn flashcards_history(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<ApiResponse<Vec<HistoryEntry>>>, (StatusCode, Json<ApiResponse<()>>)> {
    record_history(&state, &jar, ResourceKind::Flashcards).await
}

pub async fn quiz_history(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<ApiResponse<Vec<HistoryEntry>>>, (StatusCode, Json<ApiResponse<()>>)> {
    record_history(&state, &jar, ResourceKind::Quiz).await
}

pub async fn random_flashcards(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<ApiResponse<Value>>, (StatusCode, Json<ApiResponse<()>>)> {
    let owner = require_owner(&jar, &state.auth, "random_flashcards", "flashcard set")?;

    match state.records.random_review_set(&owner).await {
        Ok(set) => {
            log_api_success!("random_flashcards", "review set assembled");
            Ok(Json(ApiResponse::success(set)))
        }
        Err(e) => {
            let context = ErrorContext::new("random_flashcards", "flashcard set");
            Err(ApiError::DatabaseError(e).to_response_with_context(context))
        }
    }
}

// Audio

pub async fn get_audio(
    State(state): State<AppState>,
    Query(params): Query<AudioParams>,
) -> Result<Response, (StatusCode, Json<ApiResponse<()>>)> {
    log_api_start!("get_audio", record_id = params.flashcard_id);
    let context = || {
        ErrorContext::new("get_audio", "flashcard set").with_id(&params.flashcard_id.to_string())
    };

    let record = match state
        .records
        .get_record(ResourceKind::Flashcards, params.flashcard_id, None)
        .await
    {
        Ok(Some(record)) => record,
        Ok(None) => {
            let error = ApiError::NotFound(format!("flashcard set {}", params.flashcard_id));
            return Err(error.to_response_with_context(context()));
        }
        Err(e) => return Err(ApiError::DatabaseError(e).to_response_with_context(context())),
    };

    // The word must come from the stored phrase; anything else is rejected
    // before any synthesis request goes out.
    let word = params.word.trim();
    let normalized = word.to_lowercase();
    if normalized.is_empty() || !record.phrase.trim().to_lowercase().contains(&normalized) {
        log_api_warn!(
            "get_audio",
            record_id = params.flashcard_id,
            "requested word is not part of the phrase"
        );
        let error =
            ApiError::ValidationError("word is not part of the flashcard phrase".to_string());
        return Err(error.to_response_with_context(context()));
    }

    match state.audio.synthesize(word, params.speed).await {
        Ok(bytes) => {
            log_api_success!("get_audio", record_id = params.flashcard_id, "audio synthesized");
            Ok(([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response())
        }
        Err(e) => {
            Err(ApiError::LlmError(e.to_string()).to_response_with_context(context()))
        }
    }
}

// Verification gate entry point (ungated)

pub async fn verify_turnstile(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<VerifyTurnstileRequest>,
) -> Result<(CookieJar, Json<ApiResponse<()>>), (StatusCode, Json<ApiResponse<()>>)> {
    log_api_start!("verify_turnstile");
    let context = || ErrorContext::new("verify_turnstile", "verification");

    let Some(token) = request.token else {
        let error = ApiError::ValidationError("Missing Turnstile token.".to_string());
        return Err(error.to_response_with_context(context()));
    };

    match state.auth.verify_turnstile_token(&token).await {
        Ok(true) => {}
        Ok(false) => {
            let error = ApiError::Forbidden("Invalid Turnstile token.".to_string());
            return Err(error.to_response_with_context(context()));
        }
        Err(e) => {
            info!(error = %e, "Turnstile verification request failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(
                    "Error validating Turnstile token.".to_string(),
                )),
            ));
        }
    }

    let verification = match state.auth.issue_verification_token() {
        Ok(token) => token,
        Err(e) => {
            return Err(ApiError::DatabaseError(e).to_response_with_context(context()));
        }
    };

    let cookie = Cookie::build((VERIFICATION_COOKIE, verification))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .build();

    log_api_success!("verify_turnstile", "verification cookie issued");
    Ok((
        jar.add(cookie),
        Json(ApiResponse {
            success: true,
            data: None,
            error: None,
        }),
    ))
}

pub fn create_router(state: AppState) -> Router {
    let gated = Router::new()
        // Flashcard routes
        .route("/api/v1/flashcards", post(create_flashcards))
        .route("/api/v1/flashcards/fetch", post(fetch_flashcards))
        .route("/api/v1/flashcards/random", get(random_flashcards))
        .route("/api/v1/flashcards/history", get(flashcards_history))
        // Quiz routes
        .route("/api/v1/quiz", post(create_quiz))
        .route("/api/v1/quiz/fetch", post(fetch_quiz))
        .route("/api/v1/quiz/history", get(quiz_history))
        // Audio route
        .route("/api/v1/audio", get(get_audio))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_verification,
        ));

    Router::new()
        .merge(gated)
        .route("/api/verify-turnstile", post(verify_turnstile))
        .with_state(state)
}
