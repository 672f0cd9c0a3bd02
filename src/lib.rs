//! Resumable Upload Server
//!
//! Accepts large files as a sequence of offset-addressed chunks and commits
//! them to a local directory or an S3-compatible bucket. Interrupted uploads
//! resume from the last committed offset.
//!
//! # Modules
//!
//! - `upload`: sessions, backends and the upload state machine
//! - `routes`: HTTP handlers
//! - `storage`: object storage client

pub mod access;
pub mod config;
pub mod error;
pub mod hooks;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/health", get(routes::health::health_check))
        .nest(routes::tus::TUS_PREFIX, routes::tus::router())
        .nest("/api/settings", routes::settings::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
