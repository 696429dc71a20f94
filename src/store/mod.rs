//! Vector index integration
//!
//! This module wraps the external vector store behind a collaborator trait
//! and provides:
//! - Batched chunk upserts with handle reset and corruption recovery
//! - Project-scoped similarity queries
//! - An HTTP collection-API backend

mod http_backend;

pub use http_backend::*;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Raw query response: list-of-lists, one inner list per query vector.
#[derive(Debug, Clone, Default)]
pub struct QueryResponse {
    pub ids: Vec<Vec<String>>,
    pub documents: Vec<Vec<String>>,
    pub metadatas: Vec<Vec<Value>>,
    pub distances: Vec<Vec<f32>>,
}

/// One similarity hit, flattened from the store response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub document: String,
    pub metadata: Value,
    pub distance: f32,
}

/// Handle to one collection of an external vector store.
///
/// Ids are idempotent keys: re-adding an existing id overwrites by store
/// contract.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Add records; the four arrays are parallel and equal-length.
    async fn add(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        documents: Vec<String>,
        metadatas: Vec<Value>,
    ) -> Result<()>;

    /// Nearest-neighbor query for a single embedding.
    async fn query(
        &self,
        embedding: Vec<f32>,
        n_results: usize,
        where_filter: Option<Value>,
    ) -> Result<QueryResponse>;
}

/// Creates store handles; invoked lazily and again after a handle reset.
#[async_trait]
pub trait VectorStoreFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn VectorStore>>;
}

/// Writes chunk vectors in slices, recovering from store-internal errors.
///
/// The cached handle is discarded on any store error and lazily recreated
/// through the factory; when the error carries the metadata segment
/// corruption signature the persisted segment directory is wiped first.
/// Each failing slice is retried exactly once.
pub struct VectorIndexWriter {
    factory: Box<dyn VectorStoreFactory>,
    handle: Option<Box<dyn VectorStore>>,
    persist_dir: Option<PathBuf>,
    upsert_batch_size: usize,
}

impl VectorIndexWriter {
    pub fn new(
        factory: Box<dyn VectorStoreFactory>,
        persist_dir: Option<PathBuf>,
        upsert_batch_size: usize,
    ) -> Self {
        Self {
            factory,
            handle: None,
            persist_dir,
            upsert_batch_size: usize::max(1, upsert_batch_size),
        }
    }

    async fn handle(&mut self) -> Result<&dyn VectorStore> {
        if self.handle.is_none() {
            self.handle = Some(self.factory.open().await?);
        }
        self.handle
            .as_deref()
            .ok_or_else(|| Error::VectorStore("store handle unavailable".to_string()))
    }

    /// Drop the cached handle so the next use reopens through the factory.
    fn reset_handle(&mut self) {
        self.handle = None;
    }

    fn wipe_persisted_segment(&self) -> Result<()> {
        if let Some(dir) = &self.persist_dir {
            if dir.exists() {
                warn!("Wiping corrupted vector store segment at {:?}", dir);
                std::fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }

    async fn add_slice(
        &mut self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        documents: &[String],
        metadatas: &[Value],
    ) -> Result<()> {
        let store = self.handle().await?;
        store
            .add(
                ids.to_vec(),
                embeddings.to_vec(),
                documents.to_vec(),
                metadatas.to_vec(),
            )
            .await
    }

    /// Upsert one document's chunk set.
    ///
    /// The parallel arrays must have equal length; this is validated before
    /// any store access. Writes go out in `upsert_batch_size` slices.
    pub async fn upsert_chunks(
        &mut self,
        document_id: &str,
        project_id: &str,
        chunk_ids: &[String],
        chunk_indexes: &[usize],
        contents: &[String],
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        let len = chunk_ids.len();
        if chunk_indexes.len() != len || contents.len() != len || embeddings.len() != len {
            return Err(Error::Validation(format!(
                "Mismatched chunk arrays: {} ids, {} indexes, {} contents, {} embeddings",
                len,
                chunk_indexes.len(),
                contents.len(),
                embeddings.len()
            )));
        }
        if len == 0 {
            return Ok(());
        }

        let metadatas: Vec<Value> = chunk_ids
            .iter()
            .zip(chunk_indexes)
            .map(|(chunk_id, chunk_index)| {
                json!({
                    "document_id": document_id,
                    "project_id": project_id,
                    "chunk_id": chunk_id,
                    "chunk_index": chunk_index,
                })
            })
            .collect();

        let mut start = 0;
        while start < len {
            let end = usize::min(start + self.upsert_batch_size, len);
            debug!(
                "Upserting chunks {}..{} of {} for document {}",
                start, end, len, document_id
            );

            let slice_result = self
                .add_slice(
                    &chunk_ids[start..end],
                    &embeddings[start..end],
                    &contents[start..end],
                    &metadatas[start..end],
                )
                .await;

            if let Err(err) = slice_result {
                match err {
                    Error::VectorStore(_) => {
                        warn!(
                            "Vector store write failed, resetting handle and retrying once: {}",
                            err
                        );
                        self.reset_handle();
                        if err.is_corruption() {
                            self.wipe_persisted_segment()?;
                        }
                        self.add_slice(
                            &chunk_ids[start..end],
                            &embeddings[start..end],
                            &contents[start..end],
                            &metadatas[start..end],
                        )
                        .await?;
                    }
                    other => return Err(other),
                }
            }

            start = end;
        }

        Ok(())
    }

    /// Query for chunks similar to `embedding` within one project,
    /// optionally narrowed to a single document.
    pub async fn query_similar(
        &mut self,
        project_id: &str,
        embedding: Vec<f32>,
        document_id: Option<&str>,
        n_results: usize,
    ) -> Result<Vec<SearchHit>> {
        let project_filter = json!({ "project_id": { "$eq": project_id } });
        let where_filter = match document_id {
            Some(doc_id) => json!({
                "$and": [project_filter, { "document_id": { "$eq": doc_id } }]
            }),
            None => project_filter,
        };

        let store = self.handle().await?;
        let response = store
            .query(embedding, n_results, Some(where_filter))
            .await?;

        // one query vector in, so only the first inner lists matter
        let ids = response.ids.into_iter().next().unwrap_or_default();
        let mut documents = response.documents.into_iter().next().unwrap_or_default();
        let mut metadatas = response.metadatas.into_iter().next().unwrap_or_default();
        let distances = response.distances.into_iter().next().unwrap_or_default();

        let mut hits = Vec::with_capacity(ids.len());
        for (i, id) in ids.into_iter().enumerate() {
            hits.push(SearchHit {
                id,
                document: if i < documents.len() {
                    std::mem::take(&mut documents[i])
                } else {
                    String::new()
                },
                metadata: if i < metadatas.len() {
                    std::mem::take(&mut metadatas[i])
                } else {
                    Value::Null
                },
                distance: distances.get(i).copied().unwrap_or_default(),
            });
        }

        Ok(hits)
    }
}
