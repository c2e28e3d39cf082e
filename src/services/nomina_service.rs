//! Roster rows (nóminas). Their `rut` column is the owner key set scanned by
//! bulk exports.

use crate::{
    models::nomina::{NewNomina, Nomina},
    services::document_service::{DocumentError, DocumentResult},
};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct NominaService {
    pub db: Arc<SqlitePool>,
}

impl NominaService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn create_nomina(&self, new: NewNomina) -> DocumentResult<Nomina> {
        let rut = new.rut.trim();
        if rut.is_empty() {
            return Err(DocumentError::Invalid("rut is required".into()));
        }

        let nomina = sqlx::query_as::<_, Nomina>(
            "INSERT INTO nominas (rut, nombre, empresa, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING id, rut, nombre, empresa, created_at",
        )
        .bind(rut)
        .bind(new.nombre.trim())
        .bind(new.empresa.trim())
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        Ok(nomina)
    }

    /// List roster rows, optionally restricted to one company.
    pub async fn list_nominas(&self, empresa: Option<&str>) -> DocumentResult<Vec<Nomina>> {
        let rows = match empresa {
            Some(empresa) => {
                sqlx::query_as::<_, Nomina>(
                    "SELECT id, rut, nombre, empresa, created_at
                     FROM nominas WHERE empresa = ? ORDER BY id ASC",
                )
                .bind(empresa)
                .fetch_all(&*self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, Nomina>(
                    "SELECT id, rut, nombre, empresa, created_at FROM nominas ORDER BY id ASC",
                )
                .fetch_all(&*self.db)
                .await?
            }
        };
        Ok(rows)
    }

    /// Delete a roster row and every document filed under it.
    ///
    /// Documents are matched by `nomina_id` and by the row's `rut`, both in
    /// one transaction; any failure rolls the whole removal back.
    pub async fn delete_nomina(&self, id: i64) -> DocumentResult<u64> {
        let mut tx = self.db.begin().await?;

        let rut = sqlx::query_scalar::<_, String>("SELECT rut FROM nominas WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DocumentError::NominaNotFound(id))?;

        // Keep documents of another roster row that shares the same rut.
        let shared = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM nominas WHERE rut = ? AND id <> ?",
        )
        .bind(&rut)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let removed = if shared == 0 {
            sqlx::query("DELETE FROM documents WHERE nomina_id = ? OR rut = ?")
                .bind(id)
                .bind(&rut)
                .execute(&mut *tx)
                .await?
        } else {
            sqlx::query("DELETE FROM documents WHERE nomina_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
        };

        sqlx::query("DELETE FROM nominas WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            nomina_id = id,
            rut = %rut,
            documents = removed.rows_affected(),
            "deleted nomina"
        );
        Ok(removed.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::document::NewDocument,
        services::document_service::{DocumentRepository, DocumentService},
        test_support::{memory_pool, pdf_bytes},
    };

    #[tokio::test]
    async fn delete_nomina_cascades_to_documents() {
        let db = Arc::new(memory_pool().await);
        let nominas = NominaService::new(db.clone());
        let documents = DocumentService::new(db.clone());

        let worker = nominas
            .create_nomina(NewNomina {
                rut: "11.111.111-1".into(),
                nombre: "Ana".into(),
                empresa: "ACME".into(),
            })
            .await
            .unwrap();
        let other = nominas
            .create_nomina(NewNomina {
                rut: "22.222.222-2".into(),
                nombre: "Luis".into(),
                empresa: "ACME".into(),
            })
            .await
            .unwrap();

        for (rut, nomina_id, name) in [
            (&worker.rut, Some(worker.id), "a.pdf"),
            (&worker.rut, None, "b.pdf"),
            (&other.rut, Some(other.id), "c.pdf"),
        ] {
            documents
                .create_document(NewDocument {
                    rut: rut.clone(),
                    nomina_id,
                    empresa: "ACME".into(),
                    file_name: name.into(),
                    content: pdf_bytes(name),
                })
                .await
                .unwrap();
        }

        let removed = nominas.delete_nomina(worker.id).await.unwrap();
        assert_eq!(removed, 2);
        assert!(documents.list_documents(&worker.rut).await.unwrap().is_empty());
        assert_eq!(documents.list_documents(&other.rut).await.unwrap().len(), 1);
        assert_eq!(documents.owner_keys().await.unwrap(), vec![other.rut]);
    }

    #[tokio::test]
    async fn delete_unknown_nomina_is_not_found() {
        let nominas = NominaService::new(Arc::new(memory_pool().await));
        assert!(matches!(
            nominas.delete_nomina(99).await,
            Err(DocumentError::NominaNotFound(99))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_company() {
        let nominas = NominaService::new(Arc::new(memory_pool().await));
        for (rut, empresa) in [("1", "ACME"), ("2", "Globex"), ("3", "ACME")] {
            nominas
                .create_nomina(NewNomina {
                    rut: rut.into(),
                    nombre: String::new(),
                    empresa: empresa.into(),
                })
                .await
                .unwrap();
        }
        let acme = nominas.list_nominas(Some("ACME")).await.unwrap();
        assert_eq!(acme.iter().map(|n| n.rut.as_str()).collect::<Vec<_>>(), ["1", "3"]);
        assert_eq!(nominas.list_nominas(None).await.unwrap().len(), 3);
    }
}
