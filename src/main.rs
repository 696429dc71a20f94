//! archivist CLI entry point

use archivist::{
    config::Config,
    embed::create_embedder,
    error::{Error, Result},
    job::{CancelToken, JobRunner, RunTelemetry, TextIngestOutcome},
    meta::{IngestionJob, JobKind, JobStatus, MetaDb, Project},
    progress::{ingest_bar, spinner, LogWriterFactory},
    store::{HttpVectorStoreFactory, VectorIndexWriter},
};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use indicatif::ProgressBar;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "archivist")]
#[command(version, about = "Per-project knowledge base ingestion and search", long_about = None)]
struct Cli {
    /// Base directory for config, database and index (defaults to ~/.archivist)
    #[arg(long, global = true, env = "ARCHIVIST_HOME")]
    base_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize archivist configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Manage projects (named knowledge bases)
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Ingest content into a project's index
    Ingest {
        #[command(subcommand)]
        source: IngestSource,
    },

    /// Search a project's indexed chunks
    Query {
        /// Project to search
        #[arg(short, long)]
        project: String,

        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Restrict results to a single document ID
        #[arg(long)]
        document: Option<String>,
    },

    /// Inspect and control ingestion jobs
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Show system status
    Status,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Register a new project
    Add {
        /// Unique project name
        name: String,

        /// Optional description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// List registered projects
    List,
}

#[derive(Subcommand)]
enum IngestSource {
    /// Incrementally ingest a local repository
    Repo {
        /// Path to the repository root
        path: PathBuf,

        /// Project to ingest into
        #[arg(short, long)]
        project: String,
    },

    /// Ingest a single file
    File {
        /// Path to the file
        path: PathBuf,

        /// Project to ingest into
        #[arg(short, long)]
        project: String,

        /// Document name (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Ingest text from stdin
    Text {
        /// Project to ingest into
        #[arg(short, long)]
        project: String,

        /// Document name
        #[arg(short, long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// List recent jobs
    List {
        /// Only show jobs for this project
        #[arg(short, long)]
        project: Option<String>,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show one job in detail
    Show {
        /// Job ID
        job_id: String,
    },

    /// Request cancellation of a pending or running job
    Cancel {
        /// Job ID
        job_id: String,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if matches!(cli.command, Commands::Init { .. }) {
        return handle_init(cli).await;
    }

    // Handle completions command (doesn't need config or database)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "archivist", &mut std::io::stdout());
        return Ok(());
    }

    // Load configuration
    let config = load_config(cli.base_dir.clone()).await?;

    // Initialize components
    let db = MetaDb::connect(&config).await?;

    // Handle commands
    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Project { action } => {
            handle_project(&db, action, cli.json).await?;
        }

        Commands::Ingest { source } => {
            handle_ingest(&config, &db, source, cli.json).await?;
        }

        Commands::Query {
            project,
            query,
            limit,
            document,
        } => {
            handle_query(
                &config,
                &db,
                &project,
                &query,
                limit,
                document.as_deref(),
                cli.json,
            )
            .await?;
        }

        Commands::Jobs { action } => {
            handle_jobs(&db, action, cli.json).await?;
        }

        Commands::Status => {
            handle_status(&config, &db, cli.json).await?;
        }
    }

    Ok(())
}

async fn handle_init(cli: Cli) -> Result<()> {
    let Commands::Init { force } = cli.command else {
        unreachable!()
    };

    let config = Config::with_base_dir(cli.base_dir);

    if config.paths.config_file.exists() && !force {
        eprintln!(
            "Config file already exists at: {}\nUse --force to overwrite.",
            config.paths.config_file.display()
        );
        std::process::exit(1);
    }

    config.save()?;
    MetaDb::new(&config.paths.db_file).await?;

    println!("✓ archivist initialized successfully");
    println!("  Config: {}", config.paths.config_file.display());
    println!("\nNext steps:");
    println!("  1. Edit the config file to point at your embedding backend and vector store");
    println!("  2. Register a project: archivist project add my-project");
    println!("  3. Ingest a repository: archivist ingest repo /path/to/repo -p my-project");

    Ok(())
}

async fn load_config(base_dir: Option<PathBuf>) -> Result<Config> {
    let probe = Config::with_base_dir(base_dir.clone());

    if !probe.paths.config_file.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'archivist init' first.",
            probe.paths.config_file.display()
        );
        std::process::exit(1);
    }

    Config::load_from(base_dir)
}

async fn require_project_by_name(db: &MetaDb, name: &str) -> Result<Project> {
    db.get_project_by_name(name).await?.ok_or_else(|| {
        Error::NotFound(format!(
            "Project '{}' not found. Register it with 'archivist project add {}'.",
            name, name
        ))
    })
}

async fn handle_project(db: &MetaDb, action: ProjectAction, json: bool) -> Result<()> {
    match action {
        ProjectAction::Add { name, description } => {
            if db.get_project_by_name(&name).await?.is_some() {
                return Err(Error::Validation(format!(
                    "Project '{}' already exists",
                    name
                )));
            }

            let project = Project::new(name, description);
            db.insert_project(&project).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&project)?);
            } else {
                println!("✓ Project '{}' registered", project.name);
                println!("  ID: {}", project.id);
            }
        }

        ProjectAction::List => {
            let projects = db.list_projects().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&projects)?);
            } else if projects.is_empty() {
                println!("No projects registered. Add one with 'archivist project add <name>'.");
            } else {
                for project in &projects {
                    let stats = db.get_project_stats(&project.id).await?;
                    println!(
                        "{}  {} ({} documents, {} chunks)",
                        project.id, project.name, stats.document_count, stats.chunk_count
                    );
                    if let Some(desc) = &project.description {
                        println!("    {}", desc);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Polls the job row so an external `jobs cancel` reaches the in-process
/// token, and mirrors persisted progress onto the bar.
fn spawn_job_watcher(
    db: MetaDb,
    job_id: String,
    cancel: CancelToken,
    bar: ProgressBar,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(250));
        loop {
            interval.tick().await;

            let job = match db.get_job(&job_id).await {
                Ok(Some(job)) => job,
                _ => break,
            };

            if job.total_items > 0 {
                bar.set_length(job.total_items as u64);
                bar.set_position(job.processed_items as u64);
            }

            if job.cancel_requested {
                cancel.cancel();
                bar.set_message("cancelling...");
            }

            match job.get_status() {
                Ok(status) if status.is_terminal() => break,
                Err(_) => break,
                _ => {}
            }
        }
    })
}

/// First Ctrl-C requests a clean cancel; a second one exits immediately.
fn spawn_ctrlc_bridge(cancel: CancelToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancellation requested, finishing the current file...");
            cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    })
}

async fn handle_ingest(
    config: &Config,
    db: &MetaDb,
    source: IngestSource,
    json: bool,
) -> Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let mut writer = VectorIndexWriter::new(
        Box::new(HttpVectorStoreFactory::from_config(config)),
        Some(config.paths.store_dir.clone()),
        config.ingest.upsert_batch_size,
    );

    match source {
        IngestSource::Repo { path, project } => {
            let project = require_project_by_name(db, &project).await?;
            let job = IngestionJob::new(project.id, JobKind::Repo, path.display().to_string());
            db.create_job(&job).await?;

            let cancel = CancelToken::new();
            let bar = ingest_bar(0);
            let watcher =
                spawn_job_watcher(db.clone(), job.id.clone(), cancel.clone(), bar.clone());
            let ctrlc = spawn_ctrlc_bridge(cancel.clone());

            let mut runner = JobRunner::new(db, embedder.as_ref(), &mut writer, config)?;
            let mut telemetry = RunTelemetry::default();
            let result = runner.run(&job.id, &cancel, &mut telemetry).await;

            watcher.abort();
            ctrlc.abort();
            bar.finish_and_clear();

            let status = result?;

            if json {
                let out = serde_json::json!({
                    "job_id": job.id,
                    "status": status.to_string(),
                    "telemetry": telemetry,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                match status {
                    JobStatus::Cancelled => println!("\n⚠ Repository ingestion cancelled"),
                    _ => println!("\n✓ Repository ingestion complete"),
                }
                println!(
                    "  Files processed: {} of {} ({} skipped unchanged)",
                    telemetry.processed, telemetry.discovered, telemetry.skipped
                );
                println!("  Documents created: {}", telemetry.documents_created);
                println!("  Chunks indexed: {}", telemetry.chunks_indexed);
                println!("  Bytes processed: {}", telemetry.bytes_processed);
                println!("  Job: {}", job.id);
            }
        }

        IngestSource::File {
            path,
            project,
            name,
        } => {
            let project = require_project_by_name(db, &project).await?;

            let bytes = std::fs::read(&path)?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let doc_name = name.unwrap_or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            });

            let job = IngestionJob::new(project.id, JobKind::File, path.display().to_string());
            db.create_job(&job).await?;

            let bar = spinner(&format!("Ingesting {}...", doc_name));
            let mut runner = JobRunner::new(db, embedder.as_ref(), &mut writer, config)?;
            let mut telemetry = RunTelemetry::default();
            let result = runner.run_text(&job.id, &doc_name, &text, &mut telemetry).await;
            bar.finish_and_clear();

            print_text_outcome(&job.id, &result?, json)?;
        }

        IngestSource::Text { project, name } => {
            let project = require_project_by_name(db, &project).await?;

            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;

            let job = IngestionJob::new(project.id, JobKind::Text, "stdin".to_string());
            db.create_job(&job).await?;

            let bar = spinner(&format!("Ingesting {}...", name));
            let mut runner = JobRunner::new(db, embedder.as_ref(), &mut writer, config)?;
            let mut telemetry = RunTelemetry::default();
            let result = runner.run_text(&job.id, &name, &text, &mut telemetry).await;
            bar.finish_and_clear();

            print_text_outcome(&job.id, &result?, json)?;
        }
    }

    Ok(())
}

fn print_text_outcome(job_id: &str, outcome: &TextIngestOutcome, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "job_id": job_id,
            "document_id": outcome.document_id,
            "chunk_count": outcome.chunk_count,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("✓ Document ingested ({} chunks)", outcome.chunk_count);
        println!("  Document: {}", outcome.document_id);
        println!("  Job: {}", job_id);
    }
    Ok(())
}

async fn handle_query(
    config: &Config,
    db: &MetaDb,
    project_name: &str,
    query: &str,
    limit: Option<usize>,
    document: Option<&str>,
    json: bool,
) -> Result<()> {
    let project = require_project_by_name(db, project_name).await?;
    let k = limit
        .unwrap_or(config.query.default_k)
        .min(config.query.max_results);

    let embedder = create_embedder(&config.embedding)?;
    let mut writer = VectorIndexWriter::new(
        Box::new(HttpVectorStoreFactory::from_config(config)),
        Some(config.paths.store_dir.clone()),
        config.ingest.upsert_batch_size,
    );

    let bar = spinner("Searching...");
    let embedding = embedder
        .embed(vec![query.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Embedding("provider returned no vector for the query".to_string()))?;
    let hits = writer.query_similar(&project.id, embedding, document, k).await?;
    bar.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    println!("\n🔍 Query: {}\n", query);
    println!("Found {} results:\n", hits.len());

    for (i, hit) in hits.iter().enumerate() {
        let doc_name = match hit.metadata.get("document_id").and_then(|v| v.as_str()) {
            Some(id) => db
                .get_document(id)
                .await?
                .map(|d| d.name)
                .unwrap_or_else(|| id.to_string()),
            None => hit.id.clone(),
        };
        let chunk_index = hit
            .metadata
            .get("chunk_index")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        println!(
            "{}. [distance: {:.3}] {} #{}",
            i + 1,
            hit.distance,
            doc_name,
            chunk_index
        );

        let preview = if hit.document.chars().count() > 200 {
            let cut: String = hit.document.chars().take(200).collect();
            format!("{}...", cut.trim())
        } else {
            hit.document.trim().to_string()
        };
        println!("   {}\n", preview.replace('\n', " "));
    }

    Ok(())
}

async fn handle_jobs(db: &MetaDb, action: JobsAction, json: bool) -> Result<()> {
    match action {
        JobsAction::List { project, limit } => {
            let jobs = match project {
                Some(name) => {
                    let project = require_project_by_name(db, &name).await?;
                    db.list_project_jobs(&project.id, limit).await?
                }
                None => db.list_jobs(limit).await?,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No jobs recorded.");
            } else {
                for job in &jobs {
                    println!(
                        "{}  {:<9} {:<4} {}/{}  {}",
                        job.id,
                        job.status,
                        job.kind,
                        job.processed_items,
                        job.total_items,
                        job.source
                    );
                }
            }
        }

        JobsAction::Show { job_id } => {
            let job = db.require_job(&job_id).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                println!("Job {}", job.id);
                println!("  Project: {}", job.project_id);
                println!("  Kind: {}", job.kind);
                println!("  Source: {}", job.source);
                println!("  Status: {}", job.status);
                println!(
                    "  Progress: {}/{} items, {}/{} bytes",
                    job.processed_items, job.total_items, job.processed_bytes, job.total_bytes
                );
                println!(
                    "  Indexed: {} documents, {} chunks",
                    job.documents_created, job.chunks_indexed
                );
                println!("  Created: {}", job.created_at);
                if let Some(started) = &job.started_at {
                    println!("  Started: {}", started);
                }
                if let Some(finished) = &job.finished_at {
                    println!("  Finished: {}", finished);
                }
                if job.cancel_requested {
                    println!("  Cancel requested: yes");
                }
                if let Some(err) = &job.error_message {
                    println!("  Error: {}", err);
                }
            }
        }

        JobsAction::Cancel { job_id } => {
            let flagged = db.request_cancel(&job_id).await?;

            if json {
                println!(r#"{{"cancel_requested": {}}}"#, flagged);
            } else if flagged {
                println!("✓ Cancellation requested for job {}", job_id);
            } else {
                println!("Job {} is not pending or running.", job_id);
            }
        }
    }

    Ok(())
}

async fn handle_status(config: &Config, db: &MetaDb, json: bool) -> Result<()> {
    let stats = db.get_global_stats().await?;

    if json {
        let out = serde_json::json!({
            "base_dir": config.paths.base_dir.display().to_string(),
            "store_url": config.store_url,
            "collection": config.collection_name,
            "embedding_model": config.embedding.model,
            "embedding_dimension": config.embedding.dimension,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("archivist status:");
        println!("  Base directory: {}", config.paths.base_dir.display());
        println!(
            "  Vector store: {} (collection '{}')",
            config.store_url, config.collection_name
        );
        println!(
            "  Embedding model: {} ({} dimensions)",
            config.embedding.model, config.embedding.dimension
        );
        println!("  Projects: {}", stats.project_count);
        println!("  Documents: {}", stats.document_count);
        println!("  Chunks: {}", stats.chunk_count);
        println!("  Jobs: {}", stats.job_count);
    }

    Ok(())
}
