//! Ingestion job orchestration
//!
//! A job moves through `pending -> running -> {completed, failed, cancelled}`
//! and never leaves a terminal state. The runner drives one job end to end as
//! a single logical task: discovery, change detection, then per-file
//! ingestion with relational commits batched by file count. Progress is
//! persisted on the job row at every batch commit so other processes can
//! observe a run by re-reading the row.

mod counters;
mod ingestor;

pub use counters::*;
pub use ingestor::*;

use crate::chunk::ChunkParams;
use crate::config::Config;
use crate::discover::{detect_changes, discover};
use crate::embed::{BatchLimits, Embedder};
use crate::error::{Error, Result};
use crate::meta::{
    with_busy_retry, FileFingerprint, IngestionJob, JobStatus, MetaDb, RetryPolicy,
};
use crate::store::VectorIndexWriter;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag.
///
/// Cancellation is best-effort: the runner checks the token before starting
/// each file, so a file already mid-ingestion finishes (or fails) first.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// What a single-text run produced
#[derive(Debug, Clone)]
pub struct TextIngestOutcome {
    pub document_id: String,
    pub chunk_count: usize,
}

/// Drives one ingestion job to a terminal state
pub struct JobRunner<'a> {
    db: &'a MetaDb,
    embedder: &'a dyn Embedder,
    writer: &'a mut VectorIndexWriter,
    chunk_params: ChunkParams,
    batch_limits: BatchLimits,
    include_patterns: Vec<String>,
    commit_batch_size: usize,
    policy: RetryPolicy,
}

impl<'a> JobRunner<'a> {
    pub fn new(
        db: &'a MetaDb,
        embedder: &'a dyn Embedder,
        writer: &'a mut VectorIndexWriter,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            db,
            embedder,
            writer,
            chunk_params: ChunkParams::try_from(&config.chunk)?,
            batch_limits: BatchLimits::from(&config.embedding),
            include_patterns: config.ingest.include_patterns.clone(),
            commit_batch_size: usize::max(1, config.ingest.commit_batch_size),
            policy: RetryPolicy::from_config(&config.ingest),
        })
    }

    /// Run a pending repository-ingestion job.
    ///
    /// Returns the terminal status for cancelled/completed runs; a failing
    /// run persists the failure on the job row and propagates the error.
    pub async fn run(
        &mut self,
        job_id: &str,
        cancel: &CancelToken,
        telemetry: &mut RunTelemetry,
    ) -> Result<JobStatus> {
        let job = self.db.require_job(job_id).await?;

        let db = self.db;
        with_busy_retry(&self.policy, || async move {
            db.mark_job_running(job_id).await
        })
        .await?;
        info!(
            "Job {} started: {} ingestion of {} for project {}",
            job_id, job.kind, job.source, job.project_id
        );

        match self.execute(&job, cancel, telemetry).await {
            Ok(status) => Ok(status),
            Err(err) => Err(self.mark_failed(job_id, err, telemetry).await),
        }
    }

    /// Run a pending single-text job (pasted text or one uploaded file).
    pub async fn run_text(
        &mut self,
        job_id: &str,
        name: &str,
        text: &str,
        telemetry: &mut RunTelemetry,
    ) -> Result<TextIngestOutcome> {
        let job = self.db.require_job(job_id).await?;

        let db = self.db;
        with_busy_retry(&self.policy, || async move {
            db.mark_job_running(job_id).await
        })
        .await?;
        info!(
            "Job {} started: {} ingestion of '{}' for project {}",
            job_id, job.kind, name, job.project_id
        );

        match self.execute_text(&job, name, text, telemetry).await {
            Ok(outcome) => {
                let db = self.db;
                let documents = telemetry.documents_created as i64;
                let chunks = telemetry.chunks_indexed as i64;
                with_busy_retry(&self.policy, || async move {
                    db.finish_job(job_id, JobStatus::Completed, documents, chunks, None)
                        .await
                })
                .await?;
                info!("Job {} completed: {}", job_id, telemetry.summary());
                Ok(outcome)
            }
            Err(err) => Err(self.mark_failed(job_id, err, telemetry).await),
        }
    }

    async fn execute(
        &mut self,
        job: &IngestionJob,
        cancel: &CancelToken,
        telemetry: &mut RunTelemetry,
    ) -> Result<JobStatus> {
        self.db.require_project(&job.project_id).await?;

        let root = PathBuf::from(&job.source);
        let candidates = discover(&root, &self.include_patterns)?;
        telemetry.discovered = candidates.len();

        let (pending, skipped) =
            detect_changes(self.db, &job.project_id, &root, &candidates).await?;
        telemetry.skipped = skipped;

        let total_items = pending.len() as i64;
        let total_bytes: i64 = pending.iter().map(|f| f.bytes as i64).sum();
        let snapshot = json!({
            "include_patterns": self.include_patterns,
            "name_prefix": job.source,
            "discovered": candidates.len(),
            "skipped_unchanged": skipped,
        });

        let db = self.db;
        let job_id = job.id.as_str();
        let snapshot_ref = &snapshot;
        with_busy_retry(&self.policy, || async move {
            db.set_job_discovery(job_id, total_items, total_bytes, snapshot_ref)
                .await
        })
        .await?;
        info!(
            "Job {}: {} of {} files need ingestion ({} skipped)",
            job.id,
            pending.len(),
            candidates.len(),
            skipped
        );

        let ingestor = DocumentIngestor::new(
            self.db,
            self.embedder,
            self.chunk_params,
            self.batch_limits,
        );

        let mut staged: Vec<(PreparedDocument, FileFingerprint)> = Vec::new();
        let mut cancelled = false;
        let mut failure: Option<Error> = None;

        for file in &pending {
            if cancel.is_cancelled() {
                info!(
                    "Job {}: cancellation requested, stopping before the next file",
                    job.id
                );
                cancelled = true;
                break;
            }

            let name = file.relative_path.to_string_lossy().into_owned();
            let outcome = async {
                let prepared = ingestor
                    .prepare(&job.project_id, &name, None, &file.text)
                    .await?;
                ingestor.index(self.writer, &prepared).await?;
                Ok::<PreparedDocument, Error>(prepared)
            }
            .await;

            let prepared = match outcome {
                Ok(prepared) => prepared,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };

            telemetry.processed += 1;
            telemetry.bytes_processed += file.bytes;
            telemetry.documents_created += 1;
            telemetry.chunks_indexed += prepared.chunks.len();

            let fingerprint =
                FileFingerprint::new(job.project_id.clone(), name, file.digest.clone());
            staged.push((prepared, fingerprint));

            if staged.len() >= self.commit_batch_size {
                self.flush(&job.id, &mut staged, telemetry).await?;
            }
        }

        if let Some(err) = failure {
            // commit what already succeeded; the file error stays the job error
            if let Err(flush_err) = self.flush(&job.id, &mut staged, telemetry).await {
                warn!(
                    "Job {}: could not commit staged work after a file failure: {}",
                    job.id, flush_err
                );
            }
            return Err(err);
        }

        // files that finished before a cancellation stay committed
        self.flush(&job.id, &mut staged, telemetry).await?;

        let documents = telemetry.documents_created as i64;
        let chunks = telemetry.chunks_indexed as i64;

        if cancelled {
            let db = self.db;
            with_busy_retry(&self.policy, || async move {
                db.finish_job(job_id, JobStatus::Cancelled, documents, chunks, None)
                    .await
            })
            .await?;
            info!(
                "Job {} cancelled after {} of {} files",
                job.id, telemetry.processed, total_items
            );
            return Ok(JobStatus::Cancelled);
        }

        let db = self.db;
        with_busy_retry(&self.policy, || async move {
            db.finish_job(job_id, JobStatus::Completed, documents, chunks, None)
                .await
        })
        .await?;
        info!("Job {} completed: {}", job.id, telemetry.summary());
        Ok(JobStatus::Completed)
    }

    async fn execute_text(
        &mut self,
        job: &IngestionJob,
        name: &str,
        text: &str,
        telemetry: &mut RunTelemetry,
    ) -> Result<TextIngestOutcome> {
        let ingestor = DocumentIngestor::new(
            self.db,
            self.embedder,
            self.chunk_params,
            self.batch_limits,
        );

        let db = self.db;
        let job_id = job.id.as_str();
        let total_bytes = text.len() as i64;
        let snapshot = json!({ "name": name });
        let snapshot_ref = &snapshot;
        with_busy_retry(&self.policy, || async move {
            db.set_job_discovery(job_id, 1, total_bytes, snapshot_ref).await
        })
        .await?;

        let prepared = ingestor.prepare(&job.project_id, name, None, text).await?;
        ingestor.index(self.writer, &prepared).await?;

        telemetry.discovered = 1;
        telemetry.processed = 1;
        telemetry.documents_created = 1;
        telemetry.chunks_indexed = prepared.chunks.len();
        telemetry.bytes_processed = text.len() as u64;

        let prepared_ref = &prepared;
        with_busy_retry(&self.policy, || async move {
            let mut tx = db.begin().await?;
            DocumentIngestor::write_rows_tx(&mut tx, prepared_ref).await?;
            MetaDb::update_job_progress_tx(&mut tx, job_id, 1, total_bytes).await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;

        Ok(TextIngestOutcome {
            document_id: prepared.document.id,
            chunk_count: prepared.chunks.len(),
        })
    }

    /// Commit staged documents, their fingerprints and a progress write in
    /// one transaction, retrying busy/locked contention.
    async fn flush(
        &self,
        job_id: &str,
        staged: &mut Vec<(PreparedDocument, FileFingerprint)>,
        telemetry: &RunTelemetry,
    ) -> Result<()> {
        if staged.is_empty() {
            return Ok(());
        }

        let db = self.db;
        let batch: &[(PreparedDocument, FileFingerprint)] = staged;
        let count = batch.len();
        let processed = telemetry.processed as i64;
        let bytes = telemetry.bytes_processed as i64;

        with_busy_retry(&self.policy, || async move {
            let mut tx = db.begin().await?;
            for (prepared, fingerprint) in batch {
                DocumentIngestor::write_rows_tx(&mut tx, prepared).await?;
                MetaDb::upsert_fingerprint_tx(&mut tx, fingerprint).await?;
            }
            MetaDb::update_job_progress_tx(&mut tx, job_id, processed, bytes).await?;
            tx.commit().await?;
            Ok(())
        })
        .await?;

        debug!(
            "Job {}: committed batch of {} documents ({} files processed so far)",
            job_id, count, processed
        );
        staged.clear();
        Ok(())
    }

    async fn mark_failed(&self, job_id: &str, err: Error, telemetry: &RunTelemetry) -> Error {
        let message = err.to_string();
        let db = self.db;
        let message_ref = Some(message.as_str());
        let documents = telemetry.documents_created as i64;
        let chunks = telemetry.chunks_indexed as i64;
        if let Err(finish_err) = with_busy_retry(&self.policy, || async move {
            db.finish_job(job_id, JobStatus::Failed, documents, chunks, message_ref)
                .await
        })
        .await
        {
            warn!(
                "Job {}: could not persist failure state: {}",
                job_id, finish_err
            );
        }
        warn!("Job {} failed: {}", job_id, err);
        err
    }
}
