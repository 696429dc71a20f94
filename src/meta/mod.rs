//! Metadata storage using SQLite
//!
//! This module handles all local metadata storage including:
//! - Projects (named knowledge bases)
//! - Documents, sections and chunks
//! - File fingerprints (incremental change detection)
//! - Ingestion jobs (cancellable run state and progress)
//!
//! The database is a lock-sensitive single writer; callers wrap every
//! flush/commit in [`with_busy_retry`] so busy/locked contention is retried
//! with backoff while every other error class propagates untouched.

mod schema;

pub use schema::*;

use crate::config::{Config, IngestConfig};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Transaction handle over the metadata pool
pub type MetaTx = sqlx::Transaction<'static, sqlx::Sqlite>;

/// Ingestion job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal states are never left once entered
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(Error::Config(format!("Unknown job status: {}", s))),
        }
    }
}

/// Ingestion job kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Repo,
    Text,
    File,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Repo => write!(f, "repo"),
            JobKind::Text => write!(f, "text"),
            JobKind::File => write!(f, "file"),
        }
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "repo" => Ok(JobKind::Repo),
            "text" => Ok(JobKind::Text),
            "file" => Ok(JobKind::File),
            _ => Err(Error::Config(format!("Unknown job kind: {}", s))),
        }
    }
}

/// A named knowledge base
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

impl Project {
    pub fn new(name: String, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// One ingested text
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

impl Document {
    pub fn new(project_id: String, name: String, description: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            name,
            description,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// An ordered span within a document
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub document_id: String,
    pub title: Option<String>,
    pub position: i64,
    pub breadcrumb: Option<String>,
}

impl Section {
    pub fn new(
        document_id: String,
        title: Option<String>,
        position: i64,
        breadcrumb: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id,
            title,
            position,
            breadcrumb,
        }
    }
}

/// A retrieval unit; its id doubles as the vector record key
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub section_id: Option<String>,
    pub position: i64,
    pub content: String,
}

impl Chunk {
    pub fn new(
        document_id: String,
        section_id: Option<String>,
        position: i64,
        content: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id,
            section_id,
            position,
            content,
        }
    }
}

/// Content hash for one (project, relative path) pair
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub project_id: String,
    pub relative_path: String,
    pub content_hash: String,
    pub last_ingested_at: String,
}

impl FileFingerprint {
    pub fn new(project_id: String, relative_path: String, content_hash: String) -> Self {
        Self {
            project_id,
            relative_path,
            content_hash,
            last_ingested_at: Utc::now().to_rfc3339(),
        }
    }
}

/// One ingestion run
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: String,
    pub project_id: String,
    pub kind: String,
    pub source: String,
    pub status: String,
    pub total_items: i64,
    pub processed_items: i64,
    pub total_bytes: i64,
    pub processed_bytes: i64,
    pub documents_created: i64,
    pub chunks_indexed: i64,
    pub cancel_requested: bool,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error_message: Option<String>,
    pub metadata_json: Option<String>,
}

impl IngestionJob {
    pub fn new(project_id: String, kind: JobKind, source: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            kind: kind.to_string(),
            source,
            status: JobStatus::Pending.to_string(),
            total_items: 0,
            processed_items: 0,
            total_bytes: 0,
            processed_bytes: 0,
            documents_created: 0,
            chunks_indexed: 0,
            cancel_requested: false,
            created_at: Utc::now().to_rfc3339(),
            started_at: None,
            finished_at: None,
            error_message: None,
            metadata_json: None,
        }
    }

    pub fn get_status(&self) -> Result<JobStatus> {
        self.status.parse()
    }

    pub fn metadata(&self) -> Option<serde_json::Value> {
        self.metadata_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
    }
}

/// Bounded retry for busy/locked database errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(ingest: &IngestConfig) -> Self {
        Self {
            max_attempts: ingest.busy_max_attempts,
            base_backoff: Duration::from_millis(ingest.busy_backoff_ms),
        }
    }
}

/// Run `op` until it succeeds, retrying only busy/locked-class errors.
///
/// Backoff grows linearly with the attempt number. Any non-busy error, and
/// busy errors once attempts are exhausted, propagate to the caller. The
/// operation must be safe to re-run from the top; a rolled-back transaction
/// qualifies.
pub async fn with_busy_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_busy() && attempt < policy.max_attempts => {
                warn!(
                    "Database busy (attempt {}/{}), retrying: {}",
                    attempt, policy.max_attempts, err
                );
                tokio::time::sleep(policy.base_backoff * attempt).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.db_file).await
    }

    /// Create database with path directly (without full config)
    pub async fn new(db_path: &std::path::Path) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };

        if !db.is_initialized().await? {
            db.init_schema().await?;
        }

        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='projects'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    /// Begin a transaction for a batched commit
    pub async fn begin(&self) -> Result<MetaTx> {
        Ok(self.pool.begin().await?)
    }

    // ===== Project Operations =====

    /// Insert a new project
    pub async fn insert_project(&self, project: &Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, description, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(&project.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get project by ID
    pub async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(project)
    }

    /// Get project by unique name
    pub async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(project)
    }

    /// Get project by ID, failing with NotFound when missing
    pub async fn require_project(&self, id: &str) -> Result<Project> {
        self.get_project(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Project {} not found", id)))
    }

    /// List all projects
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let projects =
            sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY created_at DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(projects)
    }

    // ===== Document / Section / Chunk Operations =====

    /// Get document by ID
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    /// List chunks for a document in position order
    pub async fn list_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let chunks = sqlx::query_as::<_, Chunk>(
            "SELECT * FROM chunks WHERE document_id = ? ORDER BY position",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(chunks)
    }

    /// Insert a document inside an open transaction
    pub async fn insert_document_tx(tx: &mut MetaTx, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, project_id, name, description, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.project_id)
        .bind(&doc.name)
        .bind(&doc.description)
        .bind(&doc.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Insert a section inside an open transaction
    pub async fn insert_section_tx(tx: &mut MetaTx, section: &Section) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sections (id, document_id, title, position, breadcrumb)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&section.id)
        .bind(&section.document_id)
        .bind(&section.title)
        .bind(section.position)
        .bind(&section.breadcrumb)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Insert a chunk inside an open transaction
    pub async fn insert_chunk_tx(tx: &mut MetaTx, chunk: &Chunk) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, section_id, position, content)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(&chunk.section_id)
        .bind(chunk.position)
        .bind(&chunk.content)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    // ===== Fingerprint Operations =====

    /// Get the stored fingerprint for a (project, relative path) pair
    pub async fn get_fingerprint(
        &self,
        project_id: &str,
        relative_path: &str,
    ) -> Result<Option<FileFingerprint>> {
        let fp = sqlx::query_as::<_, FileFingerprint>(
            "SELECT * FROM file_fingerprints WHERE project_id = ? AND relative_path = ?",
        )
        .bind(project_id)
        .bind(relative_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(fp)
    }

    /// Upsert a fingerprint inside an open transaction; last writer wins
    pub async fn upsert_fingerprint_tx(tx: &mut MetaTx, fp: &FileFingerprint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_fingerprints (project_id, relative_path, content_hash, last_ingested_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, relative_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                last_ingested_at = excluded.last_ingested_at
            "#,
        )
        .bind(&fp.project_id)
        .bind(&fp.relative_path)
        .bind(&fp.content_hash)
        .bind(&fp.last_ingested_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    // ===== Job Operations =====

    /// Insert a new job row (status pending)
    pub async fn create_job(&self, job: &IngestionJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_jobs (
                id, project_id, kind, source, status,
                total_items, processed_items, total_bytes, processed_bytes,
                documents_created, chunks_indexed,
                cancel_requested, created_at, started_at, finished_at,
                error_message, metadata_json
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.project_id)
        .bind(&job.kind)
        .bind(&job.source)
        .bind(&job.status)
        .bind(job.total_items)
        .bind(job.processed_items)
        .bind(job.total_bytes)
        .bind(job.processed_bytes)
        .bind(job.documents_created)
        .bind(job.chunks_indexed)
        .bind(job.cancel_requested)
        .bind(&job.created_at)
        .bind(&job.started_at)
        .bind(&job.finished_at)
        .bind(&job.error_message)
        .bind(&job.metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get job by ID
    pub async fn get_job(&self, id: &str) -> Result<Option<IngestionJob>> {
        let job = sqlx::query_as::<_, IngestionJob>("SELECT * FROM ingestion_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Get job by ID, failing with NotFound when missing
    pub async fn require_job(&self, id: &str) -> Result<IngestionJob> {
        self.get_job(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", id)))
    }

    /// List recent jobs, newest first
    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<IngestionJob>> {
        let jobs = sqlx::query_as::<_, IngestionJob>(
            "SELECT * FROM ingestion_jobs ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// List recent jobs for one project, newest first
    pub async fn list_project_jobs(
        &self,
        project_id: &str,
        limit: i64,
    ) -> Result<Vec<IngestionJob>> {
        let jobs = sqlx::query_as::<_, IngestionJob>(
            "SELECT * FROM ingestion_jobs WHERE project_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(project_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    /// Transition a pending job to running: stamp started_at, clear any
    /// prior error, zero the progress counters.
    pub async fn mark_job_running(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_jobs SET
                status = 'running',
                started_at = ?,
                error_message = NULL,
                processed_items = 0,
                processed_bytes = 0
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Validation(format!("Job {} is not pending", id)));
        }
        Ok(())
    }

    /// Persist discovery results: totals and the metadata snapshot
    pub async fn set_job_discovery(
        &self,
        id: &str,
        total_items: i64,
        total_bytes: i64,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion_jobs SET total_items = ?, total_bytes = ?, metadata_json = ? WHERE id = ?",
        )
        .bind(total_items)
        .bind(total_bytes)
        .bind(metadata.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Write progress counters inside an open transaction, so observable
    /// progress lands together with the batch it describes.
    pub async fn update_job_progress_tx(
        tx: &mut MetaTx,
        id: &str,
        processed_items: i64,
        processed_bytes: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE ingestion_jobs SET processed_items = ?, processed_bytes = ? WHERE id = ?",
        )
        .bind(processed_items)
        .bind(processed_bytes)
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Transition a running job to a terminal state, persisting the final
    /// document/chunk totals alongside it.
    pub async fn finish_job(
        &self,
        id: &str,
        status: JobStatus,
        documents_created: i64,
        chunks_indexed: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::Validation(format!(
                "Job finish status must be terminal, got {}",
                status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE ingestion_jobs SET
                status = ?,
                finished_at = ?,
                documents_created = ?,
                chunks_indexed = ?,
                error_message = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(status.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(documents_created)
        .bind(chunks_indexed)
        .bind(error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Validation(format!("Job {} is not running", id)));
        }
        Ok(())
    }

    /// Flag a pending or running job for cancellation. Returns false when
    /// the job is already terminal (or missing).
    pub async fn request_cancel(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ingestion_jobs SET cancel_requested = 1 WHERE id = ? AND status IN ('pending', 'running')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ===== Statistics =====

    /// Get per-project document/chunk counts
    pub async fn get_project_stats(&self, project_id: &str) -> Result<ProjectStats> {
        let doc_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE project_id = ?")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;

        let chunk_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM chunks c
            JOIN documents d ON c.document_id = d.id
            WHERE d.project_id = ?
            "#,
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ProjectStats {
            document_count: doc_count as usize,
            chunk_count: chunk_count as usize,
        })
    }

    /// Get global statistics
    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        let project_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
            .fetch_one(&self.pool)
            .await?;

        let doc_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;

        let job_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingestion_jobs")
            .fetch_one(&self.pool)
            .await?;

        Ok(GlobalStats {
            project_count: project_count as usize,
            document_count: doc_count as usize,
            chunk_count: chunk_count as usize,
            job_count: job_count as usize,
        })
    }
}

/// Statistics for a single project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStats {
    pub document_count: usize,
    pub chunk_count: usize,
}

/// Global statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub project_count: usize,
    pub document_count: usize,
    pub chunk_count: usize,
    pub job_count: usize,
}
