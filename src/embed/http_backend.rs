use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::embedding_backend::EmbeddingClient;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

pub struct HttpEmbedder {
    client: EmbeddingClient,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = EmbeddingClient::new(
            &config.backend_url,
            Duration::from_secs(config.timeout_secs),
        )?;
        Ok(Self {
            client,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    fn validate_dimensions(&self, embeddings: &[Vec<f32>]) -> Result<()> {
        if let Some(mismatch) = embeddings.iter().find(|vec| vec.len() != self.dimension) {
            return Err(Error::Embedding(format!(
                "Embedding dimension mismatch for model '{}': expected {}, got {}",
                self.model,
                self.dimension,
                mismatch.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = texts.len();
        let embeddings = self.client.create_embeddings(&self.model, texts).await?;

        if embeddings.len() != expected {
            return Err(Error::Embedding(format!(
                "Provider returned {} embeddings for {} inputs",
                embeddings.len(),
                expected
            )));
        }
        self.validate_dimensions(&embeddings)?;

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(url: &str, dimension: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            backend_url: url.to_string(),
            model: "test-model".to_string(),
            dimension,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_embed_validates_count_and_dimension() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/embed/text"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
            })))
            .mount(&mock_server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&mock_server.uri(), 3)).unwrap();
        let out = embedder
            .embed(vec!["a".into(), "b".into()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);

        let wrong_dim = HttpEmbedder::new(&test_config(&mock_server.uri(), 4)).unwrap();
        let err = wrong_dim.embed(vec!["a".into(), "b".into()]).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_embed_rejects_count_mismatch() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/embed/text"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2]]
            })))
            .mount(&mock_server)
            .await;

        let embedder = HttpEmbedder::new(&test_config(&mock_server.uri(), 2)).unwrap();
        let err = embedder
            .embed(vec!["a".into(), "b".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        // no server; the empty path must not touch the network
        let embedder = HttpEmbedder::new(&test_config("http://127.0.0.1:1", 2)).unwrap();
        let out = embedder.embed(Vec::new()).await.unwrap();
        assert!(out.is_empty());
    }
}
