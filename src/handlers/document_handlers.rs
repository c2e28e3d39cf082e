//! HTTP handlers for single document attachments.

use crate::{
    errors::AppError,
    models::document::{DocumentMeta, NewDocument},
    services::document_service::DocumentRepository,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListDocumentsQuery {
    pub rut: String,
}

/// `GET /documents?rut=`: metadata of every document filed under an owner.
pub async fn list_documents(
    State(state): State<AppState>,
    Query(q): Query<ListDocumentsQuery>,
) -> Result<Json<Vec<DocumentMeta>>, AppError> {
    let rows = state.documents.list_documents(q.rut.trim()).await?;
    Ok(Json(rows))
}

async fn parse_upload(mut multipart: Multipart) -> Result<NewDocument, AppError> {
    let mut rut = None;
    let mut empresa = String::new();
    let mut nomina_id = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart payload: {err}")))?
    {
        let name = field.name().map(str::to_owned).unwrap_or_default();
        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_owned)
                    .ok_or_else(|| AppError::bad_request("file field needs a file name"))?;
                let bytes = field.bytes().await.map_err(|err| {
                    AppError::bad_request(format!("failed to read upload: {err}"))
                })?;
                file = Some((file_name, bytes.to_vec()));
            }
            "rut" | "empresa" | "nominaId" => {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid `{name}` field: {err}"))
                })?;
                match name.as_str() {
                    "rut" => rut = Some(value),
                    "empresa" => empresa = value,
                    _ => {
                        let id = value.trim().parse::<i64>().map_err(|_| {
                            AppError::bad_request(format!("nominaId `{value}` is not a number"))
                        })?;
                        nomina_id = Some(id);
                    }
                }
            }
            _ => continue,
        }
    }

    let rut = rut.ok_or_else(|| AppError::bad_request("missing multipart field `rut`"))?;
    let (file_name, content) =
        file.ok_or_else(|| AppError::bad_request("missing multipart field `file`"))?;

    Ok(NewDocument {
        rut,
        nomina_id,
        empresa,
        file_name: sanitize_file_name(&file_name),
        content,
    })
}

/// Keep only the base name of an uploaded file.
fn sanitize_file_name(raw: &str) -> String {
    raw.rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim()
        .to_string()
}

/// `POST /documents`: multipart upload of one PDF.
pub async fn upload_document(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let upload = parse_upload(multipart).await?;
    let created = state.documents.create_document(upload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /documents/{id}`: download one document.
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let doc = state
        .documents
        .get_document(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("document {} not found", id)))?;

    let length = doc.content.len();
    let disposition = format!("attachment; filename=\"{}\"", doc.file_name.replace('"', ""));
    let mut response = Response::new(Body::from(doc.content));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/pdf"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// `DELETE /documents/{id}`
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state.documents.delete_document(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
