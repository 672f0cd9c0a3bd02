//! Resumable upload routes
//!
//! HTTP surface of the upload coordinator. Every route takes the target path
//! from the URL tail.
//!
//! Endpoints:
//! - POST /api/tus/*path - Open a session (`Upload-Length`, optional `?override=true`)
//! - HEAD /api/tus/*path - Committed offset and declared length
//! - PATCH /api/tus/*path - Append one chunk at `Upload-Offset`
//! - DELETE /api/tus/*path - Abandon the session

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::upload::{UploadError, UPLOAD_LENGTH_HEADER, UPLOAD_OFFSET_HEADER};

/// Mount point of this router, used to build `Location` headers
pub const TUS_PREFIX: &str = "/api/tus";

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Upload request failed");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            post(begin).head(status).patch(append_chunk).delete(abandon),
        )
        .route(
            "/*path",
            post(begin).head(status).patch(append_chunk).delete(abandon),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct BeginQuery {
    #[serde(default, rename = "override")]
    pub overwrite: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/tus/*path
async fn begin(
    State(state): State<AppState>,
    path: Option<Path<String>>,
    Query(query): Query<BeginQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, UploadError> {
    let raw_path = request_path(path);
    let session = state
        .coordinator()
        .begin(
            &raw_path,
            header_str(&headers, UPLOAD_LENGTH_HEADER),
            query.overwrite,
        )
        .await?;

    tracing::info!(
        session_id = %session.id,
        path = %session.path,
        declared_length = session.declared_length,
        overwrite = query.overwrite,
        "Upload session opened"
    );

    let location = location_url(&state.config().server.base_url, &session.path);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)]))
}

/// HEAD /api/tus/*path
async fn status(
    State(state): State<AppState>,
    path: Option<Path<String>>,
) -> Result<impl IntoResponse, UploadError> {
    let raw_path = request_path(path);
    let status = state.coordinator().status(&raw_path).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(UPLOAD_OFFSET_HEADER),
        HeaderValue::from(status.offset),
    );
    headers.insert(
        HeaderName::from_static(UPLOAD_LENGTH_HEADER),
        HeaderValue::from(status.length),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((StatusCode::OK, headers))
}

/// PATCH /api/tus/*path
///
/// The chunk is the raw request body. It is streamed to the backend, never
/// buffered whole here.
async fn append_chunk(
    State(state): State<AppState>,
    path: Option<Path<String>>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, UploadError> {
    let raw_path = request_path(path);

    let max_chunk_size = state.config().upload.max_chunk_size;
    if let Some(length) = header_str(&headers, header::CONTENT_LENGTH.as_str())
        .and_then(|v| v.parse::<u64>().ok())
    {
        if length > max_chunk_size {
            return Err(UploadError::Validation(format!(
                "chunk of {} bytes exceeds the {} byte limit",
                length, max_chunk_size
            )));
        }
    }

    let stream = body
        .into_data_stream()
        .map_err(std::io::Error::other)
        .boxed();

    let offset = state
        .coordinator()
        .append_chunk(
            &raw_path,
            header_str(&headers, header::CONTENT_TYPE.as_str()),
            header_str(&headers, UPLOAD_OFFSET_HEADER),
            stream,
        )
        .await?;

    Ok((
        StatusCode::NO_CONTENT,
        [(HeaderName::from_static(UPLOAD_OFFSET_HEADER), HeaderValue::from(offset))],
    ))
}

/// DELETE /api/tus/*path
async fn abandon(
    State(state): State<AppState>,
    path: Option<Path<String>>,
) -> Result<StatusCode, UploadError> {
    let raw_path = request_path(path);
    state.coordinator().abandon(&raw_path).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

fn request_path(path: Option<Path<String>>) -> String {
    path.map(|Path(p)| p).unwrap_or_default()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Absolute URL of an upload, with each path segment percent-encoded
pub fn location_url(base_url: &str, path: &str) -> String {
    let encoded: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();

    format!(
        "{}{}/{}",
        base_url.trim_end_matches('/'),
        TUS_PREFIX,
        encoded.join("/")
    )
}

// ============================================================================
// Tests
// ============================================================================
