//! Shared fixtures for unit and route tests.

use crate::{
    db,
    models::document::{Document, DocumentMeta},
    services::document_service::{DocumentError, DocumentRepository, DocumentResult},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};

/// Fresh in-memory database with the schema applied.
///
/// A single connection keeps every query on the same in-memory database.
pub async fn memory_pool() -> SqlitePool {
    let pool = db::connect("sqlite::memory:", 1).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub async fn insert_nomina(pool: &SqlitePool, id: i64, rut: &str) {
    sqlx::query("INSERT INTO nominas (id, rut, nombre, empresa, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(id)
        .bind(rut)
        .bind(format!("worker {id}"))
        .bind("ACME")
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
}

/// A tiny payload that passes the PDF check, unique per label.
pub fn pdf_bytes(label: &str) -> Vec<u8> {
    format!("%PDF-1.4\n% {label}\n%%EOF\n").into_bytes()
}

pub fn document(id: i64, rut: &str, file_name: &str, content: &[u8]) -> Document {
    Document {
        id,
        rut: rut.into(),
        nomina_id: None,
        empresa: "ACME".into(),
        file_name: file_name.into(),
        content: content.to_vec(),
        created_at: Utc::now(),
    }
}

/// In-memory repository with injectable failures.
#[derive(Default)]
pub struct FakeRepository {
    pub owners: Vec<String>,
    pub documents: Vec<Document>,
    /// Fail the owner key lookup itself.
    pub failing_owner_keys: bool,
    /// Owner keys whose metadata lookup fails.
    pub failing_owners: HashSet<String>,
    /// Document ids whose content fetch fails.
    pub failing_documents: HashSet<i64>,
    /// Document ids listed in metadata but missing on fetch.
    pub vanished_documents: HashSet<i64>,
    /// Extra metadata rows per owner, such as rows with invalid ids.
    pub extra_meta: HashMap<String, Vec<DocumentMeta>>,
}

impl FakeRepository {
    pub fn with_documents(documents: Vec<Document>) -> Self {
        let mut owners: Vec<String> = Vec::new();
        for doc in &documents {
            if !owners.contains(&doc.rut) {
                owners.push(doc.rut.clone());
            }
        }
        Self {
            owners,
            documents,
            ..Self::default()
        }
    }

    fn meta(doc: &Document) -> DocumentMeta {
        DocumentMeta {
            id: doc.id,
            rut: doc.rut.clone(),
            nomina_id: doc.nomina_id,
            empresa: doc.empresa.clone(),
            file_name: doc.file_name.clone(),
            size_bytes: doc.content.len() as i64,
            created_at: doc.created_at,
        }
    }
}

fn connection_lost() -> DocumentError {
    DocumentError::Sqlx(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl DocumentRepository for FakeRepository {
    async fn owner_keys(&self) -> DocumentResult<Vec<String>> {
        if self.failing_owner_keys {
            return Err(connection_lost());
        }
        Ok(self.owners.clone())
    }

    async fn list_documents(&self, owner_key: &str) -> DocumentResult<Vec<DocumentMeta>> {
        if self.failing_owners.contains(owner_key) {
            return Err(connection_lost());
        }
        let mut rows: Vec<DocumentMeta> = self
            .documents
            .iter()
            .filter(|d| d.rut == owner_key)
            .map(Self::meta)
            .collect();
        rows.extend(self.extra_meta.get(owner_key).cloned().unwrap_or_default());
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }

    async fn find_document(
        &self,
        owner_key: &str,
        file_name: &str,
    ) -> DocumentResult<Option<DocumentMeta>> {
        Ok(self
            .documents
            .iter()
            .find(|d| d.rut == owner_key && d.file_name == file_name)
            .map(Self::meta))
    }

    async fn get_document(&self, id: i64) -> DocumentResult<Option<Document>> {
        if self.failing_documents.contains(&id) {
            return Err(connection_lost());
        }
        if self.vanished_documents.contains(&id) {
            return Ok(None);
        }
        Ok(self.documents.iter().find(|d| d.id == id).cloned())
    }
}
