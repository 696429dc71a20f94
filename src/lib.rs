//! archivist - per-project knowledge-base ingestion and indexing
//!
//! This crate provides:
//! - Incremental repository ingestion with content-hash change detection
//! - Sliding-window chunking and token-capped batched embedding
//! - Vector-index writes with handle reset and corruption recovery
//! - Cancellable ingestion jobs tracked in a local SQLite database

pub mod chunk;
pub mod config;
pub mod discover;
pub mod embed;
pub mod embedding_backend;
pub mod error;
pub mod job;
pub mod meta;
pub mod progress;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
