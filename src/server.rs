//! HTTP boundary.
//!
//! | Route | Auth | Purpose |
//! |-------|------|---------|
//! | `POST /api/process-image` | none | `{imageUrl}` → `{title, author}` |
//! | `POST /api/covers` | bearer | multipart `file` → full scan |
//! | `GET /api/books?search=` | bearer | list the caller's books |
//! | `POST /api/books` | bearer | save a confirmed book |
//! | `DELETE /api/books/{id}` | bearer | remove one of the caller's books |
//! | `GET /api/status` | none | which credentials are configured |
//!
//! Every error body is `{error, message}`. Validation-class failures are
//! 400, a missing or unknown token is 401, everything else the pipeline
//! reports is 500.

use crate::error::{CoverError, ErrorKind};
use crate::output::ExtractedMetadata;
use crate::pipeline::validate::{sniff_mime_type, OwnerId, UploadRequest, MAX_UPLOAD_BYTES};
use crate::records::{BookFilter, NewBook, SharedIdentity, SharedRecordStore, StoreError};
use crate::scan::CoverScanner;
use axum::{
    extract::{
        multipart::MultipartError,
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State,
    },
    http::{
        header::{AUTHORIZATION, CONTENT_LENGTH},
        request::Parts,
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Request bodies up to this size are read, so an oversize image reaches
/// the validator and is reported as `TooLarge` rather than cut off.
pub const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Booleans only; never the credential values.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub openai_key_exists: bool,
    pub supabase_url_exists: bool,
    pub supabase_key_exists: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub scanner: Arc<CoverScanner>,
    pub records: SharedRecordStore,
    pub identity: SharedIdentity,
    pub status: ServiceStatus,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/process-image", post(process_image))
        .route("/api/covers", post(upload_cover))
        .route("/api/books", get(list_books).post(create_book))
        .route("/api/books/{id}", delete(delete_book))
        .route("/api/status", get(service_status))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Scan(#[from] CoverError),

    #[error(transparent)]
    Records(#[from] StoreError),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("{message}")]
    BadRequest { message: String },
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Scan(e) if e.kind().is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Scan(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Records(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Records(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// The short `error` field of the response body.
    fn summary(&self) -> &'static str {
        match self {
            ApiError::Scan(e) => e.kind().summary(),
            ApiError::Records(StoreError::NotFound { .. }) => "Book not found",
            ApiError::Records(StoreError::Backend(_)) => "Error saving book",
            ApiError::Unauthenticated => "Authentication required",
            ApiError::BadRequest { .. } => "Invalid request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ApiError::Scan(e) if e.kind() == ErrorKind::Unconfigured => {
                error!("Service misconfigured: {}", self);
            }
            _ if status.is_server_error() => warn!(%status, "Request failed: {}", self),
            ApiError::Unauthenticated => info!("Authorization error: {}", self),
            _ => debug!(%status, "Client error: {}", self),
        }

        let body = json!({
            "error": self.summary(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest {
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest {
            message: rejection.body_text(),
        }
    }
}

// ── Authentication ───────────────────────────────────────────────────────

/// The caller behind the request's bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: OwnerId,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthenticated)?;
        match state.identity.current_user(token).await {
            Some(user) => {
                debug!(user = %user.id, "Authenticated");
                Ok(CurrentUser { id: user.id })
            }
            None => Err(ApiError::Unauthenticated),
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ProcessImageRequest {
    #[serde(default, rename = "imageUrl")]
    pub image_url: String,
}

#[instrument(skip_all)]
async fn process_image(
    State(state): State<AppState>,
    body: Result<Json<ProcessImageRequest>, JsonRejection>,
) -> Result<Json<ExtractedMetadata>, ApiError> {
    let Json(request) = body?;
    let extraction = state.scanner.extract_from_url(&request.image_url).await?;
    Ok(Json(extraction.metadata))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverResponse {
    pub title: String,
    pub author: String,
    pub storage_key: String,
    pub public_url: String,
    pub detected: bool,
}

#[instrument(skip_all, fields(user = %user.id))]
async fn upload_cover(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<CoverResponse>, ApiError> {
    let mut request = UploadRequest::empty(user.id);
    let read_error = |e: MultipartError| multipart_error(e, &headers);

    while let Some(field) = multipart.next_field().await.map_err(read_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let declared = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(read_error)?;
        if bytes.is_empty() {
            // browsers send an empty part when no file was chosen
            break;
        }
        let mime_type = declared
            .or_else(|| sniff_mime_type(&bytes).map(str::to_string))
            .unwrap_or_default();
        request = UploadRequest::new(request.owner_id, bytes.to_vec(), mime_type);
        break;
    }

    let output = state.scanner.run(request).await?;
    Ok(Json(CoverResponse {
        detected: output.detected(),
        title: output.metadata.title,
        author: output.metadata.author,
        storage_key: output.image.storage_key,
        public_url: output.image.public_url.to_string(),
    }))
}

/// A body cut off by [`MAX_REQUEST_BODY_BYTES`] is an oversize cover, not a
/// malformed form.
fn multipart_error(e: MultipartError, headers: &HeaderMap) -> ApiError {
    if e.status() != StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::BadRequest {
            message: e.body_text(),
        };
    }
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(MAX_REQUEST_BODY_BYTES as u64 + 1);
    ApiError::Scan(CoverError::TooLarge {
        size,
        limit: MAX_UPLOAD_BYTES,
    })
}

#[derive(Debug, Deserialize)]
pub struct ListBooksQuery {
    pub search: Option<String>,
}

async fn list_books(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListBooksQuery>,
) -> Result<Response, ApiError> {
    let filter = BookFilter {
        owner: user.id,
        title_contains: query.search,
    };
    let books = state.records.select(&filter).await?;
    Ok(Json(books).into_response())
}

async fn create_book(
    State(state): State<AppState>,
    user: CurrentUser,
    body: Result<Json<NewBook>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(book) = body?;
    if book.title.trim().is_empty() {
        return Err(ApiError::BadRequest {
            message: "title must not be empty".into(),
        });
    }
    let record = state.records.insert(&user.id, book).await?;
    info!(id = %record.id, user = %user.id, "Book saved");
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn delete_book(
    State(state): State<AppState>,
    user: CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    state.records.delete(&user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn service_status(State(state): State<AppState>) -> Json<ServiceStatus> {
    Json(state.status)
}
