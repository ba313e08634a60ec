//! archive-history library
//!
//! Historical record archive for station folders: discovers record folders,
//! classifies them as inspection or construction, orders them
//! chronologically, creates and deletes them, and streams their media
//! through a chunked, correlation-id keyed transport.

pub mod api;
pub mod backend;
pub mod classifier;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod metadata;
pub mod ordering;
pub mod path_resolver;
pub mod snapshot;
pub mod sort_key;
pub mod streaming;

pub use crate::error::{ApiError, ApiResult};

use archive_common::events::EventBus;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::history::HistoryService;

/// Headroom over the upload limit for the JSON envelope around the files
const BODY_ENVELOPE_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub history: Arc<HistoryService>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Largest request body accepted (create requests carry base64 files)
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(history: Arc<HistoryService>, event_bus: EventBus, max_upload_bytes: usize) -> Self {
        Self {
            history,
            event_bus,
            startup_time: Utc::now(),
            max_body_bytes: max_upload_bytes.saturating_add(BODY_ENVELOPE_BYTES),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let body_limit = state.max_body_bytes;
    Router::new()
        .merge(api::history_routes())
        .merge(api::media_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}
