//! Archive stream producer.
//!
//! Turns a list of loaded documents into a zip body written to a bounded
//! channel, interleaving newline-terminated JSON progress records with the
//! binary chunks. One spawned task per export walks the states
//!
//! ```text
//! idle -> preparing -> streaming -> finalizing -> closed
//!                 \__________\___________\-----> errored -> closed
//! ```
//!
//! Every frame written resets the idle timer; the timer, a supersession by
//! a newer export, or a zip failure move the job to `errored`, which writes
//! an error record followed by an error item that breaks the HTTP body.
//! Bytes already sent are not retracted.

use super::{
    ExportSettings,
    archive::ArchiveWriter,
    fetch::LoadedDocument,
    guard::ExportTicket,
    naming::entry_path,
    progress::ProgressRegistry,
};
use crate::models::progress::{ProgressRecord, ProgressStage, percentage};
use bytes::Bytes;
use std::{io, pin::Pin, time::Duration};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, OwnedPermit},
    task::JoinHandle,
    time::{Instant, Sleep},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type Frame = io::Result<Bytes>;

/// Two slots stay reserved for the terminal record and error signal, so
/// the smallest useful channel leaves two more for data.
const MIN_CHANNEL_CAPACITY: usize = 4;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("archive error: {0}")]
    Io(#[from] io::Error),
    #[error("export timed out after {0:?} without activity")]
    IdleTimeout(Duration),
    #[error("superseded by new request")]
    Superseded,
    #[error("client disconnected")]
    ClientDisconnected,
    #[error("failed to encode progress record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Idle,
    Preparing,
    Streaming,
    Finalizing,
    Errored,
    Closed,
}

/// What the export task reports when it ends.
#[derive(Debug)]
pub enum ExportOutcome {
    Completed(ExportSummary),
    Failed(ExportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub entries: usize,
    pub skipped: usize,
    /// Entries whose archive path was already used by another owner.
    pub duplicate_entries: usize,
    pub total_bytes: u64,
}

/// Everything needed to build one archive.
#[derive(Debug)]
pub struct ExportJob {
    pub progress_id: String,
    pub export_name: String,
    pub documents: Vec<LoadedDocument>,
    /// Write progress records into the body. When off the body is a plain
    /// zip and progress is only visible through the registry.
    pub inline_progress: bool,
}

/// Receiving side of a running export.
pub struct ArchiveStream {
    pub frames: ReceiverStream<Frame>,
    pub outcome: JoinHandle<ExportOutcome>,
}

/// Start producing `job` on a background task.
pub fn spawn_archive_stream(
    job: ExportJob,
    ticket: ExportTicket,
    settings: &ExportSettings,
    registry: ProgressRegistry,
) -> ArchiveStream {
    let (tx, rx) = mpsc::channel(settings.channel_capacity.max(MIN_CHANNEL_CAPACITY));
    registry.start(&job.progress_id);
    let outcome = tokio::spawn(run_export(
        job,
        ticket,
        tx,
        settings.idle_timeout,
        settings.archive_batch_size,
        registry,
    ));
    ArchiveStream {
        frames: ReceiverStream::new(rx),
        outcome,
    }
}

async fn run_export(
    job: ExportJob,
    ticket: ExportTicket,
    tx: mpsc::Sender<Frame>,
    idle_timeout: Duration,
    batch_size: usize,
    registry: ProgressRegistry,
) -> ExportOutcome {
    let export_id = ticket.id();

    let (record_slot, signal_slot) = match reserve_terminal_slots(&tx).await {
        Some(slots) => slots,
        None => {
            debug!(export_id, "client gone before export started");
            return ExportOutcome::Failed(ExportError::ClientDisconnected);
        }
    };

    let mut run = ExportRun {
        export_id,
        stage: ExportStage::Idle,
        emitter: Emitter::new(tx, ticket.cancellation(), idle_timeout, job.inline_progress),
        registry,
        progress_id: job.progress_id.clone(),
    };

    let result = run.produce(&job, batch_size).await;
    // Release the slot before reporting so a waiting client sees it free.
    drop(ticket);

    match result {
        Ok(summary) => {
            let record = ProgressRecord::Complete {
                total: summary.total_bytes,
                processed: summary.total_bytes,
                percentage: 100,
            };
            run.registry.publish(&run.progress_id, &record);
            if job.inline_progress {
                if let Some(line) = terminal_line(export_id, &record) {
                    record_slot.send(Ok(line));
                }
            }
            drop(signal_slot);
            run.transition(ExportStage::Closed);
            info!(
                export_id,
                entries = summary.entries,
                skipped = summary.skipped,
                duplicates = summary.duplicate_entries,
                bytes = summary.total_bytes,
                "export completed"
            );
            ExportOutcome::Completed(summary)
        }
        Err(ExportError::ClientDisconnected) => {
            run.transition(ExportStage::Closed);
            run.registry.publish(
                &run.progress_id,
                &ProgressRecord::Error {
                    message: ExportError::ClientDisconnected.to_string(),
                },
            );
            info!(export_id, "export abandoned, client disconnected");
            ExportOutcome::Failed(ExportError::ClientDisconnected)
        }
        Err(err) => {
            run.transition(ExportStage::Errored);
            warn!(export_id, "export failed: {}", err);
            let message = err.to_string();
            let record = ProgressRecord::Error {
                message: message.clone(),
            };
            run.registry.publish(&run.progress_id, &record);
            if job.inline_progress {
                if let Some(line) = terminal_line(export_id, &record) {
                    record_slot.send(Ok(line));
                }
            }
            signal_slot.send(Err(io::Error::other(message)));
            run.transition(ExportStage::Closed);
            ExportOutcome::Failed(err)
        }
    }
}

/// Encode the last record of a stream. An encode failure drops the record
/// but not the error signal that follows it.
fn terminal_line(export_id: u64, record: &ProgressRecord) -> Option<Bytes> {
    match record.to_line() {
        Ok(line) => Some(Bytes::from(line)),
        Err(err) => {
            warn!(export_id, "failed to encode final progress record: {}", err);
            None
        }
    }
}

/// Reserve the two slots used at the very end of the stream, so the final
/// record and error signal fit even when the client stopped reading.
async fn reserve_terminal_slots(
    tx: &mpsc::Sender<Frame>,
) -> Option<(OwnedPermit<Frame>, OwnedPermit<Frame>)> {
    let record = tx.clone().reserve_owned().await.ok()?;
    let signal = tx.clone().reserve_owned().await.ok()?;
    Some((record, signal))
}

struct ExportRun {
    export_id: u64,
    stage: ExportStage,
    emitter: Emitter,
    registry: ProgressRegistry,
    progress_id: String,
}

impl ExportRun {
    fn transition(&mut self, next: ExportStage) {
        debug!(export_id = self.export_id, from = ?self.stage, to = ?next, "export stage");
        self.stage = next;
    }

    async fn progress(&mut self, record: ProgressRecord) -> Result<(), ExportError> {
        self.registry.publish(&self.progress_id, &record);
        self.emitter.record(&record).await
    }

    async fn produce(
        &mut self,
        job: &ExportJob,
        batch_size: usize,
    ) -> Result<ExportSummary, ExportError> {
        self.transition(ExportStage::Preparing);
        let total: u64 = job.documents.iter().map(|d| d.document.size()).sum();
        self.progress(ProgressRecord::Progress {
            stage: ProgressStage::Preparing,
            total,
            processed: 0,
            percentage: 0,
        })
        .await?;

        self.transition(ExportStage::Streaming);
        let mut archive = ArchiveWriter::new();
        let mut processed = 0u64;
        let mut entries = 0usize;
        let mut skipped = 0usize;

        for batch in job.documents.chunks(batch_size.max(1)) {
            for loaded in batch {
                let doc = &loaded.document;
                let path = entry_path(&job.export_name, &loaded.owner_key, &doc.file_name);
                match archive.append(&path, &doc.content) {
                    Ok(()) => {
                        processed += doc.size();
                        entries += 1;
                    }
                    Err(err) => {
                        warn!(
                            export_id = self.export_id,
                            document_id = doc.id,
                            "skipping document, append failed: {}",
                            err
                        );
                        skipped += 1;
                    }
                }

                self.emitter.chunk(archive.take_ready()?).await?;
                self.progress(ProgressRecord::Progress {
                    stage: ProgressStage::Processing,
                    total,
                    processed,
                    percentage: percentage(processed, total),
                })
                .await?;
            }
            debug!(
                export_id = self.export_id,
                entries, skipped, "archived document batch"
            );
            tokio::task::yield_now().await;
        }

        self.transition(ExportStage::Finalizing);
        let duplicate_entries = archive.duplicate_entries();
        let tail = archive.finish()?;
        self.emitter.chunk(tail).await?;

        Ok(ExportSummary {
            entries,
            skipped,
            duplicate_entries,
            total_bytes: total,
        })
    }
}

/// Writes frames to the body channel, watching for supersession and the
/// idle deadline while a write is pending.
struct Emitter {
    tx: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    idle_timeout: Duration,
    deadline: Pin<Box<Sleep>>,
    inline_progress: bool,
}

impl Emitter {
    fn new(
        tx: mpsc::Sender<Frame>,
        cancel: CancellationToken,
        idle_timeout: Duration,
        inline_progress: bool,
    ) -> Self {
        Self {
            tx,
            cancel,
            idle_timeout,
            deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            inline_progress,
        }
    }

    async fn chunk(&mut self, bytes: Bytes) -> Result<(), ExportError> {
        if bytes.is_empty() {
            return self.check();
        }
        self.send(bytes).await
    }

    async fn record(&mut self, record: &ProgressRecord) -> Result<(), ExportError> {
        if !self.inline_progress {
            return self.check();
        }
        self.send(Bytes::from(record.to_line()?)).await
    }

    fn check(&self) -> Result<(), ExportError> {
        if self.cancel.is_cancelled() {
            return Err(ExportError::Superseded);
        }
        if self.deadline.is_elapsed() {
            return Err(ExportError::IdleTimeout(self.idle_timeout));
        }
        Ok(())
    }

    async fn send(&mut self, frame: Bytes) -> Result<(), ExportError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExportError::Superseded),
            _ = &mut self.deadline => Err(ExportError::IdleTimeout(self.idle_timeout)),
            sent = self.tx.send(Ok(frame)) => {
                sent.map_err(|_| ExportError::ClientDisconnected)?;
                let next = Instant::now() + self.idle_timeout;
                self.deadline.as_mut().reset(next);
                Ok(())
            }
        }
    }
}
