//! Bulk file export handlers.
//!
//! `GET /files/download` streams every document of a table as one zip.
//! Headers are committed before the archive is built, so failures after
//! that point arrive inline as a `{"type":"error"}` record followed by a
//! broken body rather than as a status code.

use crate::{
    errors::AppError,
    services::export::{
        ExportTable,
        stream::{ArchiveStream, ExportOutcome},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Response header carrying the id to poll `/files/progress/{id}` with.
pub const PROGRESS_ID_HEADER: &str = "x-progress-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub table_id: Option<String>,
    /// Client-chosen progress id; a UUID is generated when absent.
    pub progress_id: Option<String>,
    /// Interleave JSON progress lines with the zip bytes (default `true`).
    pub inline_progress: Option<bool>,
}

/// `GET /files/download?tableId=nominas`
pub async fn download_files(
    State(state): State<AppState>,
    Query(q): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let table_id = q
        .table_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::bad_request("tableId is required"))?;

    let table = match table_id.parse::<ExportTable>() {
        Ok(table) => table,
        Err(reason) => {
            tracing::debug!("{}", reason);
            return Ok(StatusCode::OK.into_response());
        }
    };

    let Some(prepared) = state.exports.prepare_today(table).await? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let progress_id = q
        .progress_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let file_name = prepared.archive_file_name();

    let ArchiveStream { frames, outcome } = state.exports.start(
        prepared,
        progress_id.clone(),
        q.inline_progress.unwrap_or(true),
    );
    tokio::spawn(report_outcome(progress_id.clone(), outcome));

    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&progress_id) {
        headers.insert(HeaderName::from_static(PROGRESS_ID_HEADER), value);
    }
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// Log how a download ended once its export task finishes.
async fn report_outcome(progress_id: String, outcome: JoinHandle<ExportOutcome>) {
    match outcome.await {
        Ok(ExportOutcome::Completed(summary)) => tracing::debug!(
            progress_id = %progress_id,
            entries = summary.entries,
            skipped = summary.skipped,
            duplicates = summary.duplicate_entries,
            bytes = summary.total_bytes,
            "download finished"
        ),
        Ok(ExportOutcome::Failed(err)) => {
            tracing::debug!(progress_id = %progress_id, "download ended early: {}", err)
        }
        Err(err) => tracing::error!(progress_id = %progress_id, "export task panicked: {}", err),
    }
}

/// `GET /files/progress/{progress_id}`: latest snapshot of an export.
pub async fn export_progress(
    State(state): State<AppState>,
    Path(progress_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .exports
        .progress()
        .get(&progress_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no export with progress id `{}`", progress_id)))
}
