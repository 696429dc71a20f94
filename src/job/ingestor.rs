//! Turning one text into a stored document
//!
//! The ingestor prepares everything a document needs (metadata rows, chunks,
//! embeddings) before anything is written, so callers can stage several
//! documents and commit them in one relational transaction while vector
//! writes go out as they happen.

use crate::chunk::{chunk, ChunkParams};
use crate::embed::{embed_batched, BatchLimits, Embedder};
use crate::error::Result;
use crate::meta::{Chunk, Document, MetaDb, MetaTx, Section};
use crate::store::VectorIndexWriter;
use tracing::debug;

/// A fully prepared document, ready to index and commit
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub document: Document,
    pub section: Section,
    pub chunks: Vec<Chunk>,
    pub embeddings: Vec<Vec<f32>>,
}

/// Prepares and indexes single documents
pub struct DocumentIngestor<'a> {
    db: &'a MetaDb,
    embedder: &'a dyn Embedder,
    chunk_params: ChunkParams,
    batch_limits: BatchLimits,
}

impl<'a> DocumentIngestor<'a> {
    pub fn new(
        db: &'a MetaDb,
        embedder: &'a dyn Embedder,
        chunk_params: ChunkParams,
        batch_limits: BatchLimits,
    ) -> Self {
        Self {
            db,
            embedder,
            chunk_params,
            batch_limits,
        }
    }

    /// Chunk and embed one text under an existing project.
    ///
    /// All ids are minted here, before any write. Empty text still yields a
    /// document with one whole-document section and no chunks; the embedder
    /// is not called for it.
    pub async fn prepare(
        &self,
        project_id: &str,
        name: &str,
        description: Option<String>,
        text: &str,
    ) -> Result<PreparedDocument> {
        self.db.require_project(project_id).await?;

        let document = Document::new(project_id.to_string(), name.to_string(), description);
        let section = Section::new(document.id.clone(), None, 0, None);

        let texts = chunk(text, &self.chunk_params);
        if texts.is_empty() {
            debug!("Document {} has no content to chunk", name);
            return Ok(PreparedDocument {
                document,
                section,
                chunks: Vec::new(),
                embeddings: Vec::new(),
            });
        }

        let embeddings = embed_batched(self.embedder, texts.clone(), &self.batch_limits).await?;

        let chunks = texts
            .into_iter()
            .enumerate()
            .map(|(position, content)| {
                Chunk::new(
                    document.id.clone(),
                    Some(section.id.clone()),
                    position as i64,
                    content,
                )
            })
            .collect();

        Ok(PreparedDocument {
            document,
            section,
            chunks,
            embeddings,
        })
    }

    /// Upsert the prepared chunk set to the vector index in one call.
    pub async fn index(
        &self,
        writer: &mut VectorIndexWriter,
        prepared: &PreparedDocument,
    ) -> Result<()> {
        if prepared.chunks.is_empty() {
            return Ok(());
        }

        let chunk_ids: Vec<String> = prepared.chunks.iter().map(|c| c.id.clone()).collect();
        let chunk_indexes: Vec<usize> = prepared
            .chunks
            .iter()
            .map(|c| c.position as usize)
            .collect();
        let contents: Vec<String> = prepared.chunks.iter().map(|c| c.content.clone()).collect();

        writer
            .upsert_chunks(
                &prepared.document.id,
                &prepared.document.project_id,
                &chunk_ids,
                &chunk_indexes,
                &contents,
                &prepared.embeddings,
            )
            .await
    }

    /// Write the prepared relational rows into an open transaction.
    pub async fn write_rows_tx(tx: &mut MetaTx, prepared: &PreparedDocument) -> Result<()> {
        MetaDb::insert_document_tx(tx, &prepared.document).await?;
        MetaDb::insert_section_tx(tx, &prepared.section).await?;
        for chunk in &prepared.chunks {
            MetaDb::insert_chunk_tx(tx, chunk).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::meta::Project;
    use crate::store::{QueryResponse, VectorStore, VectorStoreFactory};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct StubEmbedder {
        calls: Mutex<usize>,
    }

    impl StubEmbedder {
        fn new() -> Self {
            Self {
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            *self.calls.lock().unwrap() += 1;
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    struct CountingStore {
        adds: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl VectorStore for CountingStore {
        async fn add(
            &self,
            ids: Vec<String>,
            _embeddings: Vec<Vec<f32>>,
            _documents: Vec<String>,
            _metadatas: Vec<Value>,
        ) -> Result<()> {
            self.adds.lock().unwrap().push(ids.len());
            Ok(())
        }

        async fn query(
            &self,
            _embedding: Vec<f32>,
            _n_results: usize,
            _where_filter: Option<Value>,
        ) -> Result<QueryResponse> {
            Ok(QueryResponse::default())
        }
    }

    struct CountingFactory {
        adds: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl VectorStoreFactory for CountingFactory {
        async fn open(&self) -> Result<Box<dyn VectorStore>> {
            Ok(Box::new(CountingStore {
                adds: self.adds.clone(),
            }))
        }
    }

    fn counting_writer() -> (VectorIndexWriter, Arc<Mutex<Vec<usize>>>) {
        let adds = Arc::new(Mutex::new(Vec::new()));
        let writer = VectorIndexWriter::new(
            Box::new(CountingFactory { adds: adds.clone() }),
            None,
            64,
        );
        (writer, adds)
    }

    async fn setup() -> (MetaDb, Project, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        let project = Project::new("demo".to_string(), None);
        db.insert_project(&project).await.unwrap();
        (db, project, tmp)
    }

    fn params() -> ChunkParams {
        ChunkParams::new(20, 5).unwrap()
    }

    fn limits() -> BatchLimits {
        BatchLimits {
            max_items: 64,
            max_tokens: 8000,
        }
    }

    #[tokio::test]
    async fn test_prepare_links_rows_and_aligns_embeddings() {
        let (db, project, _tmp) = setup().await;
        let embedder = StubEmbedder::new();
        let ingestor = DocumentIngestor::new(&db, &embedder, params(), limits());

        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let prepared = ingestor
            .prepare(&project.id, "notes.txt", None, text)
            .await
            .unwrap();

        assert_eq!(prepared.document.project_id, project.id);
        assert_eq!(prepared.section.document_id, prepared.document.id);
        assert!(!prepared.chunks.is_empty());
        assert_eq!(prepared.chunks.len(), prepared.embeddings.len());
        for (i, chunk) in prepared.chunks.iter().enumerate() {
            assert_eq!(chunk.document_id, prepared.document.id);
            assert_eq!(chunk.section_id.as_deref(), Some(prepared.section.id.as_str()));
            assert_eq!(chunk.position, i as i64);
        }
    }

    #[tokio::test]
    async fn test_prepare_empty_text_skips_embedding() {
        let (db, project, _tmp) = setup().await;
        let embedder = StubEmbedder::new();
        let ingestor = DocumentIngestor::new(&db, &embedder, params(), limits());

        let prepared = ingestor
            .prepare(&project.id, "empty.txt", None, "")
            .await
            .unwrap();

        assert!(prepared.chunks.is_empty());
        assert!(prepared.embeddings.is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_prepare_unknown_project_is_not_found() {
        let (db, _project, _tmp) = setup().await;
        let embedder = StubEmbedder::new();
        let ingestor = DocumentIngestor::new(&db, &embedder, params(), limits());

        let err = ingestor
            .prepare("no-such-project", "a.txt", None, "text")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_index_sends_full_chunk_set_once() {
        let (db, project, _tmp) = setup().await;
        let embedder = StubEmbedder::new();
        let ingestor = DocumentIngestor::new(&db, &embedder, params(), limits());
        let (mut writer, adds) = counting_writer();

        let prepared = ingestor
            .prepare(&project.id, "big.txt", None, &"word ".repeat(30))
            .await
            .unwrap();
        ingestor.index(&mut writer, &prepared).await.unwrap();

        let sent: usize = adds.lock().unwrap().iter().sum();
        assert_eq!(sent, prepared.chunks.len());
    }

    #[tokio::test]
    async fn test_index_makes_no_store_calls_for_empty_document() {
        let (db, project, _tmp) = setup().await;
        let embedder = StubEmbedder::new();
        let ingestor = DocumentIngestor::new(&db, &embedder, params(), limits());
        let (mut writer, adds) = counting_writer();

        let prepared = ingestor
            .prepare(&project.id, "empty.txt", None, "")
            .await
            .unwrap();
        ingestor.index(&mut writer, &prepared).await.unwrap();

        assert!(adds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_rows_commits_document_section_chunks() {
        let (db, project, _tmp) = setup().await;
        let embedder = StubEmbedder::new();
        let ingestor = DocumentIngestor::new(&db, &embedder, params(), limits());

        let prepared = ingestor
            .prepare(&project.id, "saved.txt", None, &"word ".repeat(30))
            .await
            .unwrap();

        let mut tx = db.begin().await.unwrap();
        DocumentIngestor::write_rows_tx(&mut tx, &prepared)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = db.get_document(&prepared.document.id).await.unwrap();
        assert!(stored.is_some());
        let chunks = db.list_document_chunks(&prepared.document.id).await.unwrap();
        assert_eq!(chunks.len(), prepared.chunks.len());
    }
}
