//! History API handlers
//!
//! GET /api/history/:kind, POST /api/history/records,
//! DELETE /api/history/records/:name, GET /api/history/report

use archive_common::events::RecordCategory;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::StationQuery;
use crate::error::ApiResult;
use crate::history::{HistoryView, RecordCreation, ReportView};
use crate::lifecycle::{DeleteConfirmation, RecordDraft};
use crate::path_resolver::StationContext;
use crate::AppState;

/// POST /api/history/records request
#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub station: StationContext,
    /// Listing returned with the response; defaults to inspection
    #[serde(default = "default_kind")]
    pub kind: RecordCategory,
    #[serde(flatten)]
    pub draft: RecordDraft,
}

fn default_kind() -> RecordCategory {
    RecordCategory::Inspection
}

/// DELETE /api/history/records/:name query
#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub folder: Option<String>,
    pub title: Option<String>,
    pub kind: RecordCategory,
    /// Must repeat the record name
    pub confirm: Option<String>,
}

/// GET /api/history/report query
#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub folder: Option<String>,
    pub title: Option<String>,
    pub record: String,
}

/// Native-viewer fallback response
#[derive(Debug, Serialize)]
pub struct OpenedNativelyResponse {
    pub opened_natively: bool,
    pub path: PathBuf,
}

/// GET /api/history/:kind
pub async fn get_history(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<StationQuery>,
) -> ApiResult<Json<HistoryView>> {
    let category: RecordCategory = kind.parse()?;
    Ok(Json(state.history.load(&query.context(), category).await))
}

/// POST /api/history/records
pub async fn create_record(
    State(state): State<AppState>,
    Json(request): Json<CreateRecordRequest>,
) -> ApiResult<(StatusCode, Json<RecordCreation>)> {
    let created = state
        .history
        .create_record(&request.station, request.kind, &request.draft)
        .await?;

    tracing::info!(
        record = %created.record.paths.folder_name,
        photos = created.record.photos_uploaded,
        report = created.record.report_uploaded,
        "Record created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

/// DELETE /api/history/records/:name
///
/// Backend failures come back as 502 with the backend's message.
pub async fn delete_record(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<HistoryView>> {
    let ctx = StationContext {
        folder: query.folder,
        title: query.title,
    };
    let confirmation = DeleteConfirmation::for_record(query.confirm.unwrap_or_default());
    let view = state
        .history
        .delete_record(&ctx, query.kind, &name, &confirmation)
        .await?;
    Ok(Json(view))
}

/// GET /api/history/report
pub async fn open_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Response> {
    let ctx = StationContext {
        folder: query.folder,
        title: query.title,
    };
    let response = match state.history.open_report(&ctx, &query.record).await? {
        ReportView::Document(payload) => {
            ([(header::CONTENT_TYPE, payload.mime)], payload.bytes).into_response()
        }
        ReportView::OpenedNatively { path } => Json(OpenedNativelyResponse {
            opened_natively: true,
            path,
        })
        .into_response(),
    };
    Ok(response)
}

/// Build history routes
pub fn history_routes() -> Router<AppState> {
    Router::new()
        .route("/api/history/report", get(open_report))
        .route("/api/history/records", post(create_record))
        .route("/api/history/records/:name", delete(delete_record))
        .route("/api/history/:kind", get(get_history))
}
