//! Media streaming endpoint
//!
//! GET /api/media?path=... reassembles the file through the chunked
//! transport and returns its bytes, or a `data:` URL when asked for
//! `format=data_url`.

use axum::{
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    #[default]
    Raw,
    DataUrl,
}

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub path: PathBuf,
    #[serde(default)]
    pub format: MediaFormat,
}

/// GET /api/media
pub async fn get_media(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> ApiResult<Response> {
    let payload = state.history.fetch_media(&query.path).await?;
    let response = match query.format {
        MediaFormat::Raw => {
            ([(header::CONTENT_TYPE, payload.mime)], payload.bytes).into_response()
        }
        MediaFormat::DataUrl => Json(json!({ "data_url": payload.to_data_url() })).into_response(),
    };
    Ok(response)
}

/// Build media routes
pub fn media_routes() -> Router<AppState> {
    Router::new().route("/api/media", get(get_media))
}
