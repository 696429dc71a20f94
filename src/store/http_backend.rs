use super::{QueryResponse, VectorStore, VectorStoreFactory};
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct CreateCollectionRequest {
    name: String,
    get_or_create: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct CollectionHandle {
    id: String,
}

#[derive(Debug, Clone, Serialize)]
struct AddRequest {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
    metadatas: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct QueryRequest {
    query_embeddings: Vec<Vec<f32>>,
    n_results: usize,
    #[serde(skip_serializing_if = "Option::is_none", rename = "where")]
    where_filter: Option<Value>,
    include: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawQueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f32>>>,
}

/// Send a store request, mapping transport failures and non-2xx statuses to
/// `Error::VectorStore`. The response body goes into the message so the
/// corruption signature stays visible to callers.
async fn send_store_request(request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::VectorStore(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::VectorStore(format!(
            "{}: {}",
            status,
            body.trim()
        )));
    }

    Ok(response)
}

/// Handle to one collection of a Chroma-compatible HTTP vector store.
pub struct HttpVectorStore {
    client: Client,
    base_url: Url,
    collection_id: String,
    api_key: Option<String>,
}

impl HttpVectorStore {
    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid vector store URL: {}", e)))
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        let mut request = self.client.post(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn add(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        documents: Vec<String>,
        metadatas: Vec<Value>,
    ) -> Result<()> {
        let url = self.endpoint(&format!("/api/v1/collections/{}/add", self.collection_id))?;
        let request = AddRequest {
            ids,
            embeddings,
            documents,
            metadatas,
        };
        send_store_request(self.post(url).json(&request)).await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: Vec<f32>,
        n_results: usize,
        where_filter: Option<Value>,
    ) -> Result<QueryResponse> {
        let url = self.endpoint(&format!("/api/v1/collections/{}/query", self.collection_id))?;
        let request = QueryRequest {
            query_embeddings: vec![embedding],
            n_results,
            where_filter,
            include: vec![
                "documents".to_string(),
                "metadatas".to_string(),
                "distances".to_string(),
            ],
        };

        let response = send_store_request(self.post(url).json(&request)).await?;
        let raw: RawQueryResponse = response
            .json()
            .await
            .map_err(|e| Error::VectorStore(e.to_string()))?;

        Ok(QueryResponse {
            ids: raw.ids,
            documents: raw.documents.unwrap_or_default(),
            metadatas: raw.metadatas.unwrap_or_default(),
            distances: raw.distances.unwrap_or_default(),
        })
    }
}

/// Opens collection handles against a Chroma-compatible HTTP store.
///
/// `open` performs get-or-create on the configured collection, so a handle
/// recreated after a corruption wipe transparently rebuilds the collection.
pub struct HttpVectorStoreFactory {
    base_url: String,
    collection_name: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpVectorStoreFactory {
    pub fn new(base_url: &str, collection_name: &str, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.to_string(),
            collection_name: collection_name.to_string(),
            api_key,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.store_url,
            &config.collection_name,
            config.store_api_key(),
        )
    }
}

#[async_trait]
impl VectorStoreFactory for HttpVectorStoreFactory {
    async fn open(&self) -> Result<Box<dyn VectorStore>> {
        debug!(
            "Opening vector store collection '{}' at {}",
            self.collection_name, self.base_url
        );

        let base_url = Url::parse(&self.base_url)?;
        let client = Client::builder().timeout(self.timeout).build()?;

        let url = base_url
            .join("/api/v1/collections")
            .map_err(|e| Error::Config(format!("Invalid vector store URL: {}", e)))?;
        let request = CreateCollectionRequest {
            name: self.collection_name.clone(),
            get_or_create: true,
        };

        let mut builder = client.post(url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = send_store_request(builder).await?;
        let handle: CollectionHandle = response
            .json()
            .await
            .map_err(|e| Error::VectorStore(e.to_string()))?;

        Ok(Box::new(HttpVectorStore {
            client,
            base_url,
            collection_id: handle.id,
            api_key: self.api_key.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_collection(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/collections"))
            .and(body_partial_json(serde_json::json!({
                "name": "test_chunks",
                "get_or_create": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "col-1",
                "name": "test_chunks"
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_factory_get_or_creates_collection() {
        let mock_server = MockServer::start().await;
        mount_collection(&mock_server).await;

        Mock::given(method("POST"))
            .and(path("/api/v1/collections/col-1/add"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!(true)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let factory = HttpVectorStoreFactory::new(&mock_server.uri(), "test_chunks", None);
        let store = factory.open().await.unwrap();

        store
            .add(
                vec!["id-1".into()],
                vec![vec![0.1, 0.2]],
                vec!["text".into()],
                vec![serde_json::json!({"chunk_index": 0})],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_key_is_sent_as_bearer() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/collections"))
            .and(header("authorization", "Bearer sekrit"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "col-1"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let factory = HttpVectorStoreFactory::new(
            &mock_server.uri(),
            "test_chunks",
            Some("sekrit".to_string()),
        );
        factory.open().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_body_is_preserved_for_corruption_detection() {
        let mock_server = MockServer::start().await;
        mount_collection(&mock_server).await;

        Mock::given(method("POST"))
            .and(path("/api/v1/collections/col-1/add"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_string("metadata segment reader error: checksum mismatch"),
            )
            .mount(&mock_server)
            .await;

        let factory = HttpVectorStoreFactory::new(&mock_server.uri(), "test_chunks", None);
        let store = factory.open().await.unwrap();

        let err = store
            .add(
                vec!["id-1".into()],
                vec![vec![0.1]],
                vec!["text".into()],
                vec![serde_json::json!({})],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::VectorStore(_)));
        assert!(err.is_corruption());
    }

    #[tokio::test]
    async fn test_query_parses_list_of_lists() {
        let mock_server = MockServer::start().await;
        mount_collection(&mock_server).await;

        Mock::given(method("POST"))
            .and(path("/api/v1/collections/col-1/query"))
            .and(body_partial_json(serde_json::json!({
                "query_embeddings": [[0.5, 0.5]],
                "n_results": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ids": [["a", "b"]],
                "documents": [["doc a", "doc b"]],
                "metadatas": [[{"chunk_index": 0}, {"chunk_index": 1}]],
                "distances": [[0.01, 0.2]]
            })))
            .mount(&mock_server)
            .await;

        let factory = HttpVectorStoreFactory::new(&mock_server.uri(), "test_chunks", None);
        let store = factory.open().await.unwrap();

        let response = store
            .query(
                vec![0.5, 0.5],
                2,
                Some(serde_json::json!({"project_id": {"$eq": "p1"}})),
            )
            .await
            .unwrap();

        assert_eq!(response.ids, vec![vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(response.distances, vec![vec![0.01, 0.2]]);
        assert_eq!(response.documents[0].len(), 2);
    }
}
