//! Bulk document export: resolve the owner key set of a table, load every
//! document and stream them back as one zip archive.

pub mod archive;
pub mod fetch;
pub mod guard;
pub mod naming;
pub mod progress;
pub mod stream;

use crate::{
    config::AppConfig,
    services::document_service::{DocumentRepository, DocumentResult},
};
use chrono::{NaiveDate, Utc};
use fetch::{FetchReport, fetch_documents};
use guard::ExportGuard;
use progress::ProgressRegistry;
use std::{str::FromStr, sync::Arc, time::Duration};
use stream::{ArchiveStream, ExportJob, spawn_archive_stream};
use tracing::info;

/// Tables that can be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportTable {
    Nominas,
}

impl ExportTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportTable::Nominas => "nominas",
        }
    }
}

impl FromStr for ExportTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nominas" => Ok(ExportTable::Nominas),
            other => Err(format!("table `{other}` has no file export")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub owner_batch_size: usize,
    pub archive_batch_size: usize,
    /// Fail an export when no frame could be written for this long.
    pub idle_timeout: Duration,
    pub channel_capacity: usize,
    /// How long finished progress snapshots stay pollable.
    pub progress_retention: chrono::Duration,
}

impl ExportSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            owner_batch_size: cfg.owner_batch_size,
            archive_batch_size: cfg.archive_batch_size,
            idle_timeout: Duration::from_secs(cfg.export_idle_timeout_secs),
            channel_capacity: cfg.export_channel_capacity,
            progress_retention: chrono::Duration::seconds(cfg.progress_retention_secs as i64),
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            owner_batch_size: 20,
            archive_batch_size: 10,
            idle_timeout: Duration::from_secs(15 * 60),
            channel_capacity: 16,
            progress_retention: chrono::Duration::hours(1),
        }
    }
}

/// Documents loaded for one export, ready to stream.
#[derive(Debug)]
pub struct PreparedExport {
    pub table: ExportTable,
    pub export_name: String,
    pub report: FetchReport,
}

impl PreparedExport {
    pub fn archive_file_name(&self) -> String {
        naming::archive_file_name(&self.export_name)
    }
}

#[derive(Clone)]
pub struct ExportService {
    repo: Arc<dyn DocumentRepository>,
    guard: ExportGuard,
    progress: ProgressRegistry,
    settings: ExportSettings,
}

impl ExportService {
    pub fn new(repo: Arc<dyn DocumentRepository>, settings: ExportSettings) -> Self {
        Self {
            repo,
            guard: ExportGuard::new(),
            progress: ProgressRegistry::new(),
            settings,
        }
    }

    pub fn progress(&self) -> &ProgressRegistry {
        &self.progress
    }

    pub fn guard(&self) -> &ExportGuard {
        &self.guard
    }

    /// Resolve the owner key set and load its documents.
    ///
    /// Only a failure to resolve owners is an error; failures of single
    /// owners or documents are recorded in the report. Returns `None` when
    /// nothing could be loaded.
    pub async fn prepare(
        &self,
        table: ExportTable,
        date: NaiveDate,
    ) -> DocumentResult<Option<PreparedExport>> {
        let owner_keys = match table {
            ExportTable::Nominas => self.repo.owner_keys().await?,
        };

        let report = fetch_documents(
            self.repo.as_ref(),
            &owner_keys,
            self.settings.owner_batch_size,
        )
        .await;

        info!(
            table = table.as_str(),
            owners = owner_keys.len(),
            loaded = report.loaded_count(),
            skipped = report.skipped().count(),
            "prepared export"
        );

        if report.loaded_count() == 0 {
            return Ok(None);
        }

        Ok(Some(PreparedExport {
            table,
            export_name: naming::export_name(table.as_str(), date),
            report,
        }))
    }

    pub async fn prepare_today(&self, table: ExportTable) -> DocumentResult<Option<PreparedExport>> {
        self.prepare(table, Utc::now().date_naive()).await
    }

    /// Take the export slot, superseding any running export, and start
    /// streaming.
    pub fn start(
        &self,
        prepared: PreparedExport,
        progress_id: String,
        inline_progress: bool,
    ) -> ArchiveStream {
        let pruned = self.progress.prune(self.settings.progress_retention);
        if pruned > 0 {
            tracing::debug!(pruned, "pruned finished progress snapshots");
        }

        let ticket = self.guard.acquire();
        info!(
            table = prepared.table.as_str(),
            export = %prepared.export_name,
            progress_id = %progress_id,
            ticket = ticket.id(),
            "starting export stream"
        );
        let job = ExportJob {
            progress_id,
            export_name: prepared.export_name,
            documents: prepared.report.into_documents(),
            inline_progress,
        };
        spawn_archive_stream(job, ticket, &self.settings, self.progress.clone())
    }
}
