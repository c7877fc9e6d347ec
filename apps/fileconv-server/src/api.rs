//! API handlers for the fileconv server
//!
//! Provides endpoints for:
//! - The upload form
//! - Uploading and converting files
//! - Downloading artifacts of earlier tasks

use std::path::Path as FsPath;

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, Response},
    Json,
};
use fileconv_core::{content_type_for, UploadedFile};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::ServerError;
use crate::AppState;

/// Header carrying the task identifier of an upload response
pub const TASK_ID_HEADER: &str = "x-task-id";

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Bytes left unescaped in an RFC 5987 `filename*` value (`attr-char`).
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "fileconv-server",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Handler: GET /
pub async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Handler: POST /upload
///
/// Multipart form with one `operation` field and any number of `file` fields.
/// Responds with the single artifact, or a zip archive when there are several.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ServerError> {
    let mut operation: Option<String> = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidRequest(format!("Failed to read multipart: {}", e)))?
    {
        let field_name = field.name().map(|s| s.to_string()).unwrap_or_default();
        match field_name.as_str() {
            "operation" => {
                let value = field.text().await.map_err(|e| {
                    ServerError::InvalidRequest(format!("Failed to read operation: {}", e))
                })?;
                operation = Some(value);
            }
            "file" => {
                let name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|e| {
                    ServerError::InvalidRequest(format!("Failed to read file data: {}", e))
                })?;
                files.push(UploadedFile::new(name, data.to_vec()));
            }
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    info!(
        "Upload: operation={:?}, {} file(s)",
        operation.as_deref().unwrap_or(""),
        files.len()
    );

    let outcome = state.service.process(operation.as_deref(), files).await?;
    let artifact = outcome.package.artifact();

    attachment(
        &artifact.path,
        outcome.package.content_type(),
        &artifact.file_name,
        Some(&outcome.task.id.to_string()),
    )
    .await
}

/// Handler: GET /download/:task_id/:filename
pub async fn handle_download(
    State(state): State<AppState>,
    Path((task_id, file_name)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    let path = state
        .service
        .workspace()
        .artifact_path(&task_id, &file_name)
        .await?;

    debug!("Download {}/{}", task_id, file_name);
    attachment(&path, content_type_for(&file_name), &file_name, None).await
}

/// Stream `path` back as a download without buffering it in memory.
async fn attachment(
    path: &FsPath,
    content_type: &str,
    file_name: &str,
    task_id: Option<&str>,
) -> Result<Response, ServerError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ServerError::Internal(format!("Failed to open {}: {}", path.display(), e)))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| ServerError::Internal(format!("Failed to stat {}: {}", path.display(), e)))?
        .len();

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, length)
        .header(header::CONTENT_DISPOSITION, content_disposition(file_name));
    if let Some(id) = task_id {
        builder = builder.header(TASK_ID_HEADER, id);
    }

    builder
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ServerError::Internal(format!("Failed to build response: {}", e)))
}

/// `attachment; filename="<ascii fallback>"; filename*=UTF-8''<percent-encoded name>`
///
/// The quoted parameter is header-safe ASCII for old clients; `filename*`
/// carries the exact name.
pub fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.trim().is_empty() {
        "download".to_string()
    } else {
        safe
    };
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        safe,
        utf8_percent_encode(file_name, ATTR_CHAR)
    )
}
