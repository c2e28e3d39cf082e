//! Shared handler state.

use crate::services::{
    document_service::DocumentService,
    export::{ExportService, ExportSettings},
    nomina_service::NominaService,
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub documents: DocumentService,
    pub nominas: NominaService,
    pub exports: ExportService,
}

impl AppState {
    pub fn new(db: Arc<SqlitePool>, settings: ExportSettings) -> Self {
        let documents = DocumentService::new(db.clone());
        let exports = ExportService::new(Arc::new(documents.clone()), settings);
        Self {
            nominas: NominaService::new(db.clone()),
            documents,
            exports,
            db,
        }
    }
}
