//! src/services/document_service.rs
//!
//! DocumentService: document storage backed by SQLite. Payloads live in the
//! `documents.content` blob column next to their metadata.
//!
//! Owner lookups use a dual addressing scheme inherited from historical
//! data: a document belongs to an owner key when its `rut` equals the key
//! OR its `nomina_id` equals the key parsed as an integer. Rows were loaded
//! with both typings over time; keep the OR until the data owner confirms
//! which column is authoritative.

use crate::models::document::{Document, DocumentMeta, NewDocument};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

/// Leading bytes of every PDF file.
const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document {0} not found")]
    NotFound(i64),
    #[error("nomina {0} not found")]
    NominaNotFound(i64),
    #[error("document `{file_name}` already exists for `{owner_key}`")]
    Duplicate { owner_key: String, file_name: String },
    #[error("invalid document: {0}")]
    Invalid(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Read access used by bulk exports.
///
/// Absence is never an error: lookups return `None` or an empty list, and
/// only database failures surface as `Err`.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Owner keys of every nomina row, first occurrence order.
    async fn owner_keys(&self) -> DocumentResult<Vec<String>>;

    /// Metadata of every document filed under `owner_key`, newest first.
    async fn list_documents(&self, owner_key: &str) -> DocumentResult<Vec<DocumentMeta>>;

    /// The document named `file_name` under `owner_key`, if any.
    async fn find_document(
        &self,
        owner_key: &str,
        file_name: &str,
    ) -> DocumentResult<Option<DocumentMeta>>;

    /// A full document, content included.
    async fn get_document(&self, id: i64) -> DocumentResult<Option<Document>>;
}

/// Integer side of the dual addressing scheme. Keys that do not parse
/// bind as NULL, which never compares equal, so they only match by `rut`.
fn legacy_nomina_id(owner_key: &str) -> Option<i64> {
    owner_key.trim().parse::<i64>().ok()
}

#[derive(Clone)]
pub struct DocumentService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl DocumentService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Store a new document.
    ///
    /// Content is never updated in place: replacing a file means deleting
    /// it and uploading again, so a second upload with the same name under
    /// the same owner is rejected with `Duplicate`.
    pub async fn create_document(&self, new: NewDocument) -> DocumentResult<DocumentMeta> {
        let rut = new.rut.trim().to_string();
        if rut.is_empty() {
            return Err(DocumentError::Invalid("rut is required".into()));
        }
        if new.file_name.trim().is_empty() {
            return Err(DocumentError::Invalid("file name is required".into()));
        }
        if !new.content.starts_with(PDF_MAGIC) {
            return Err(DocumentError::Invalid(
                "only PDF documents are accepted".into(),
            ));
        }

        if self.find_document(&rut, &new.file_name).await?.is_some() {
            return Err(DocumentError::Duplicate {
                owner_key: rut,
                file_name: new.file_name,
            });
        }

        let inserted = sqlx::query_as::<_, DocumentMeta>(
            r#"
            INSERT INTO documents (rut, nomina_id, empresa, file_name, content, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, rut, nomina_id, empresa, file_name,
                      length(content) AS size_bytes, created_at
            "#,
        )
        .bind(&rut)
        .bind(new.nomina_id)
        .bind(&new.empresa)
        .bind(&new.file_name)
        .bind(&new.content)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(meta) => {
                tracing::debug!(id = meta.id, rut = %meta.rut, "stored document {}", meta.file_name);
                Ok(meta)
            }
            // Lost a race with a concurrent upload of the same name.
            Err(err) if is_unique_violation(&err) => Err(DocumentError::Duplicate {
                owner_key: rut,
                file_name: new.file_name,
            }),
            Err(err) if is_foreign_key_violation(&err) => {
                Err(DocumentError::NominaNotFound(new.nomina_id.unwrap_or_default()))
            }
            Err(err) => Err(DocumentError::Sqlx(err)),
        }
    }

    /// Delete a document by id.
    pub async fn delete_document(&self, id: i64) -> DocumentResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DocumentError::NotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentRepository for DocumentService {
    async fn owner_keys(&self) -> DocumentResult<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT rut FROM nominas GROUP BY rut ORDER BY MIN(id) ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(keys)
    }

    async fn list_documents(&self, owner_key: &str) -> DocumentResult<Vec<DocumentMeta>> {
        let rows = sqlx::query_as::<_, DocumentMeta>(
            "SELECT id, rut, nomina_id, empresa, file_name,
                    length(content) AS size_bytes, created_at
             FROM documents
             WHERE rut = ? OR nomina_id = ?
             ORDER BY id DESC",
        )
        .bind(owner_key)
        .bind(legacy_nomina_id(owner_key))
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    async fn find_document(
        &self,
        owner_key: &str,
        file_name: &str,
    ) -> DocumentResult<Option<DocumentMeta>> {
        let row = sqlx::query_as::<_, DocumentMeta>(
            "SELECT id, rut, nomina_id, empresa, file_name,
                    length(content) AS size_bytes, created_at
             FROM documents
             WHERE (rut = ? OR nomina_id = ?) AND file_name = ?
             ORDER BY id DESC
             LIMIT 1",
        )
        .bind(owner_key)
        .bind(legacy_nomina_id(owner_key))
        .bind(file_name)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    async fn get_document(&self, id: i64) -> DocumentResult<Option<Document>> {
        let row = sqlx::query_as::<_, Document>(
            "SELECT id, rut, nomina_id, empresa, file_name, content, created_at
             FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("foreign key")
    )
}
