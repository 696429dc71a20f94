//! Configuration management for archivist
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Vector store connection URL
    #[serde(default = "default_store_url")]
    pub store_url: String,

    /// Environment variable name for the vector store API key
    #[serde(default = "default_store_api_key_env")]
    pub store_api_key_env: String,

    /// Vector collection name for document chunks
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Ingestion pipeline configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Query configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding backend URL
    #[serde(default = "default_embedding_backend_url")]
    pub backend_url: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Maximum items per provider call
    #[serde(default = "default_max_items_per_batch")]
    pub max_items_per_batch: usize,

    /// Maximum estimated tokens per provider call
    #[serde(default = "default_max_tokens_per_batch")]
    pub max_tokens_per_batch: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per chunk
    #[serde(default = "default_chunk_max_chars")]
    pub max_chars: usize,

    /// Overlap characters between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub overlap_chars: usize,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Include patterns for repository ingestion, matched against leaf
    /// filenames only
    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,

    /// Files per relational commit batch
    #[serde(default = "default_commit_batch_size")]
    pub commit_batch_size: usize,

    /// Chunks per vector store upsert slice
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,

    /// Attempts for busy/locked database retries
    #[serde(default = "default_busy_max_attempts")]
    pub busy_max_attempts: u32,

    /// Base backoff in milliseconds between busy retries (grows linearly)
    #[serde(default = "default_busy_backoff_ms")]
    pub busy_backoff_ms: u64,
}

/// Query configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Default number of results
    #[serde(default = "default_query_k")]
    pub default_k: usize,

    /// Maximum results allowed
    #[serde(default = "default_query_max_results")]
    pub max_results: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for archivist data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Directory where the vector store persists its segments
    pub store_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_url: default_store_url(),
            store_api_key_env: default_store_api_key_env(),
            collection_name: default_collection_name(),
            embedding: EmbeddingConfig::default(),
            chunk: ChunkConfig::default(),
            ingest: IngestConfig::default(),
            query: QueryConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend_url: default_embedding_backend_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            max_items_per_batch: default_max_items_per_batch(),
            max_tokens_per_batch: default_max_tokens_per_batch(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: default_chunk_max_chars(),
            overlap_chars: default_chunk_overlap(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_patterns: default_include_patterns(),
            commit_batch_size: default_commit_batch_size(),
            upsert_batch_size: default_upsert_batch_size(),
            busy_max_attempts: default_busy_max_attempts(),
            busy_backoff_ms: default_busy_backoff_ms(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_k: default_query_k(),
            max_results: default_query_max_results(),
        }
    }
}

impl Config {
    /// Get the default base directory for archivist (~/.archivist)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".archivist")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("metadata.db"),
            store_dir: base.join("store"),
            base_dir: base,
        };
    }

    /// Default configuration rooted at the given base directory
    pub fn with_base_dir(base_dir: Option<PathBuf>) -> Self {
        let mut config = Config::default();
        config.init_paths(base_dir);
        config
    }

    /// Load configuration from default location
    pub fn load_default() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::with_base_dir(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Get the vector store API key from environment
    pub fn store_api_key(&self) -> Option<String> {
        if self.store_api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.store_api_key_env).ok()
    }

    /// Check if archivist is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk.max_chars == 0 {
            return Err(Error::Config("chunk.max_chars must be > 0".to_string()));
        }

        if self.chunk.overlap_chars >= self.chunk.max_chars {
            return Err(Error::Config(
                "chunk.overlap_chars must be < chunk.max_chars".to_string(),
            ));
        }

        if self.embedding.max_items_per_batch == 0 {
            return Err(Error::Config(
                "embedding.max_items_per_batch must be > 0".to_string(),
            ));
        }

        if self.embedding.max_tokens_per_batch == 0 {
            return Err(Error::Config(
                "embedding.max_tokens_per_batch must be > 0".to_string(),
            ));
        }

        if self.ingest.commit_batch_size == 0 {
            return Err(Error::Config(
                "ingest.commit_batch_size must be > 0".to_string(),
            ));
        }

        if self.ingest.upsert_batch_size == 0 {
            return Err(Error::Config(
                "ingest.upsert_batch_size must be > 0".to_string(),
            ));
        }

        if self.ingest.busy_max_attempts == 0 {
            return Err(Error::Config(
                "ingest.busy_max_attempts must be > 0".to_string(),
            ));
        }

        if self.query.default_k > self.query.max_results {
            return Err(Error::Config(
                "query.default_k must be <= query.max_results".to_string(),
            ));
        }

        Ok(())
    }
}
