//! Defines routes for documents, rosters and bulk exports.
//!
//! ## Structure
//! - **Export endpoints**
//!   - `GET    /files/download?tableId=` -> stream every document of a table as a zip
//!   - `GET    /files/progress/{progress_id}` -> latest progress snapshot of an export
//!
//! - **Document endpoints**
//!   - `GET    /documents?rut=` -> list document metadata of an owner
//!   - `POST   /documents` -> multipart PDF upload
//!   - `GET    /documents/{id}` -> download one PDF
//!   - `DELETE /documents/{id}` -> delete one document
//!
//! - **Roster endpoints**
//!   - `GET    /nominas` -> list roster rows
//!   - `POST   /nominas` -> create a roster row
//!   - `DELETE /nominas/{id}` -> delete a row and its documents

use crate::{
    handlers::{
        document_handlers::{delete_document, get_document, list_documents, upload_document},
        file_handlers::{download_files, export_progress},
        health_handlers::{healthz, readyz},
        nomina_handlers::{create_nomina, delete_nomina, list_nominas},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{delete, get},
};

/// Build the application router.
///
/// The upload size limit is layered on by the caller so tests can mount the
/// routes unchanged.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Exports
        .route("/files/download", get(download_files))
        .route("/files/progress/{progress_id}", get(export_progress))
        // Documents
        .route("/documents", get(list_documents).post(upload_document))
        .route("/documents/{id}", get(get_document).delete(delete_document))
        // Rosters
        .route("/nominas", get(list_nominas).post(create_nomina))
        .route("/nominas/{id}", delete(delete_nomina))
}
