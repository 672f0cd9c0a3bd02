//! Client upload settings
//!
//! Clients size their chunks and retries from this instead of hardcoding
//! them, so the server can tune both per deployment.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;
use crate::upload::BackendKind;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TusSettings {
    pub chunk_size: u64,
    pub retry_count: u32,
    pub backend: BackendKind,
    pub idle_timeout_secs: u64,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/tus", get(tus_settings))
}

/// GET /api/settings/tus
async fn tus_settings(State(state): State<AppState>) -> Json<TusSettings> {
    let upload = &state.config().upload;
    Json(TusSettings {
        chunk_size: upload.chunk_size,
        retry_count: upload.retry_count,
        backend: state.coordinator().backend().kind(),
        idle_timeout_secs: state.coordinator().registry().idle_timeout().as_secs(),
    })
}
