//! Batched document fetch for bulk exports.
//!
//! Owners are walked in fixed-size batches and, inside a batch, one at a
//! time. Each owner holds at most one pooled connection at a time, so an
//! export never competes with request traffic for more than one slot.
//! Failures are recorded per owner or per document and never abort the walk.

use crate::{models::document::Document, services::document_service::DocumentRepository};
use tracing::{debug, warn};

/// A document fetched with its content, tagged with the owner key it was
/// resolved from.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub owner_key: String,
    pub document: Document,
}

/// Why an owner or document was left out of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub owner_key: String,
    /// `None` when the owner's metadata lookup itself failed.
    pub document_id: Option<i64>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Loaded(LoadedDocument),
    Skipped(SkippedDocument),
}

/// Result of walking an owner key set, in owner order then repository order.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub outcomes: Vec<FetchOutcome>,
}

impl FetchReport {
    pub fn loaded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FetchOutcome::Loaded(_)))
            .count()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SkippedDocument> {
        self.outcomes.iter().filter_map(|o| match o {
            FetchOutcome::Skipped(skipped) => Some(skipped),
            FetchOutcome::Loaded(_) => None,
        })
    }

    pub fn into_documents(self) -> Vec<LoadedDocument> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o {
                FetchOutcome::Loaded(loaded) => Some(loaded),
                FetchOutcome::Skipped(_) => None,
            })
            .collect()
    }
}

/// Load every document of every owner in `owner_keys`.
///
/// Batching only bounds how much is in flight between progress logs; it
/// has no effect on the order or content of the report.
pub async fn fetch_documents(
    repo: &dyn DocumentRepository,
    owner_keys: &[String],
    batch_size: usize,
) -> FetchReport {
    let batch_size = batch_size.max(1);
    let mut report = FetchReport::default();

    for (batch_no, batch) in owner_keys.chunks(batch_size).enumerate() {
        for owner_key in batch {
            fetch_owner(repo, owner_key, &mut report.outcomes).await;
        }
        debug!(
            batch = batch_no + 1,
            owners = batch.len(),
            loaded = report.loaded_count(),
            "fetched owner batch"
        );
    }

    report
}

async fn fetch_owner(repo: &dyn DocumentRepository, owner_key: &str, out: &mut Vec<FetchOutcome>) {
    let metas = match repo.list_documents(owner_key).await {
        Ok(metas) => metas,
        Err(err) => {
            warn!(owner = %owner_key, "skipping owner, metadata lookup failed: {}", err);
            out.push(FetchOutcome::Skipped(SkippedDocument {
                owner_key: owner_key.to_string(),
                document_id: None,
                reason: err.to_string(),
            }));
            return;
        }
    };

    for meta in metas {
        let skip = |reason: String| {
            FetchOutcome::Skipped(SkippedDocument {
                owner_key: owner_key.to_string(),
                document_id: Some(meta.id),
                reason,
            })
        };

        if meta.id <= 0 {
            warn!(owner = %owner_key, id = meta.id, "skipping document without a valid id");
            out.push(skip("invalid document id".into()));
            continue;
        }

        match repo.get_document(meta.id).await {
            Ok(Some(document)) => out.push(FetchOutcome::Loaded(LoadedDocument {
                owner_key: owner_key.to_string(),
                document,
            })),
            Ok(None) => {
                warn!(owner = %owner_key, id = meta.id, "document disappeared before fetch");
                out.push(skip("document not found".into()));
            }
            Err(err) => {
                warn!(owner = %owner_key, id = meta.id, "skipping document: {}", err);
                out.push(skip(err.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::document::DocumentMeta,
        test_support::{FakeRepository, document},
    };
    use chrono::Utc;

    fn sample_repo() -> FakeRepository {
        FakeRepository::with_documents(vec![
            document(1, "A", "a1.pdf", b"%PDF-a1"),
            document(2, "B", "b1.pdf", b"%PDF-b1"),
            document(3, "A", "a2.pdf", b"%PDF-a2"),
            document(4, "C", "c1.pdf", b"%PDF-c1"),
        ])
    }

    fn loaded_ids(report: FetchReport) -> Vec<i64> {
        report
            .into_documents()
            .into_iter()
            .map(|l| l.document.id)
            .collect()
    }

    #[tokio::test]
    async fn keeps_owner_order_then_repository_order() {
        let repo = sample_repo();
        let owners: Vec<String> = vec!["C".into(), "A".into(), "B".into()];
        let report = fetch_documents(&repo, &owners, 20).await;
        assert_eq!(loaded_ids(report), vec![4, 3, 1, 2]);
    }

    #[tokio::test]
    async fn batch_size_does_not_change_output() {
        let repo = sample_repo();
        let owners: Vec<String> = vec!["A".into(), "B".into(), "C".into()];
        let one = loaded_ids(fetch_documents(&repo, &owners, 1).await);
        let two = loaded_ids(fetch_documents(&repo, &owners, 2).await);
        let zero = loaded_ids(fetch_documents(&repo, &owners, 0).await);
        assert_eq!(one, two);
        assert_eq!(one, zero);
    }

    #[tokio::test]
    async fn failures_are_skipped_not_fatal() {
        let mut repo = sample_repo();
        repo.failing_owners.insert("B".into());
        repo.failing_documents.insert(3);
        repo.vanished_documents.insert(4);

        let owners: Vec<String> = vec!["A".into(), "B".into(), "C".into()];
        let report = fetch_documents(&repo, &owners, 2).await;

        let skipped: Vec<(String, Option<i64>)> = report
            .skipped()
            .map(|s| (s.owner_key.clone(), s.document_id))
            .collect();
        assert_eq!(
            skipped,
            vec![
                ("A".to_string(), Some(3)),
                ("B".to_string(), None),
                ("C".to_string(), Some(4)),
            ]
        );
        assert_eq!(report.loaded_count(), 1);
        assert_eq!(loaded_ids(report), vec![1]);
    }

    #[tokio::test]
    async fn metadata_without_valid_id_is_skipped() {
        let mut repo = sample_repo();
        repo.extra_meta.insert(
            "C".into(),
            vec![DocumentMeta {
                id: 0,
                rut: "C".into(),
                nomina_id: None,
                empresa: "ACME".into(),
                file_name: "ghost.pdf".into(),
                size_bytes: 0,
                created_at: Utc::now(),
            }],
        );
        let owners: Vec<String> = vec!["C".into()];
        let report = fetch_documents(&repo, &owners, 20).await;
        assert_eq!(report.skipped().count(), 1);
        assert_eq!(loaded_ids(report), vec![4]);
    }

    #[tokio::test]
    async fn owners_without_documents_yield_empty_report() {
        let repo = sample_repo();
        let owners: Vec<String> = vec!["Z".into()];
        let report = fetch_documents(&repo, &owners, 20).await;
        assert!(report.outcomes.is_empty());
    }
}
