//! Embedding generation
//!
//! This module provides an abstraction over embedding providers with:
//! - A trait for different embedding backends
//! - HTTP embedding backend
//! - Token-aware greedy batching

mod http_backend;

pub use http_backend::*;

use crate::config::EmbeddingConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in input order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    let embedder = HttpEmbedder::new(config)?;
    Ok(Box::new(embedder))
}

/// Caps on a single provider call
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    /// Maximum number of texts per call
    pub max_items: usize,
    /// Maximum summed token estimate per call
    pub max_tokens: usize,
}

impl From<&EmbeddingConfig> for BatchLimits {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            max_items: config.max_items_per_batch,
            max_tokens: config.max_tokens_per_batch,
        }
    }
}

/// Cheap token-count proxy: roughly four characters per token, never zero.
pub fn estimate_tokens(text: &str) -> usize {
    usize::max(1, text.chars().count().div_ceil(4))
}

/// Embed `texts` in greedy batches under the per-call caps.
///
/// Output is index-aligned with the input. A batch is flushed when the next
/// item would break either cap; an item whose own estimate exceeds the token
/// cap goes out as a singleton call after the pending batch is flushed. A
/// provider failure aborts the whole operation with no partial result.
pub async fn embed_batched(
    embedder: &dyn Embedder,
    texts: Vec<String>,
    limits: &BatchLimits,
) -> Result<Vec<Vec<f32>>> {
    let mut all_embeddings = Vec::with_capacity(texts.len());
    let mut pending: Vec<String> = Vec::new();
    let mut pending_tokens = 0usize;

    for text in texts {
        let tokens = estimate_tokens(&text);

        if tokens > limits.max_tokens {
            if !pending.is_empty() {
                all_embeddings.extend(embedder.embed(std::mem::take(&mut pending)).await?);
                pending_tokens = 0;
            }
            all_embeddings.extend(embedder.embed(vec![text]).await?);
            continue;
        }

        let breaks_cap =
            pending.len() >= limits.max_items || pending_tokens + tokens > limits.max_tokens;
        if breaks_cap && !pending.is_empty() {
            all_embeddings.extend(embedder.embed(std::mem::take(&mut pending)).await?);
            pending_tokens = 0;
        }

        pending.push(text);
        pending_tokens += tokens;
    }

    if !pending.is_empty() {
        all_embeddings.extend(embedder.embed(pending).await?);
    }

    Ok(all_embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    /// Embedder that records batch sizes and encodes the input index into
    /// the returned vector so ordering is checkable.
    struct RecordingEmbedder {
        batches: Mutex<Vec<usize>>,
        calls_seen: Mutex<usize>,
        fail_on_call: Option<usize>,
    }

    impl RecordingEmbedder {
        fn new() -> Self {
            Self {
                batches: Mutex::new(Vec::new()),
                calls_seen: Mutex::new(0),
                fail_on_call: None,
            }
        }

        fn failing_on(call: usize) -> Self {
            Self {
                fail_on_call: Some(call),
                ..Self::new()
            }
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Embedder for RecordingEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            let call = {
                let mut seen = self.calls_seen.lock().unwrap();
                *seen += 1;
                *seen
            };
            if self.fail_on_call == Some(call) {
                return Err(Error::Embedding("provider rejected batch".to_string()));
            }
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32])
                .collect())
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    fn texts_of_lengths(lengths: &[usize]) -> Vec<String> {
        lengths
            .iter()
            .enumerate()
            .map(|(i, len)| {
                let c = char::from(b'a' + (i % 26) as u8);
                std::iter::repeat(c).take(*len).collect()
            })
            .collect()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(400)), 100);
    }

    #[tokio::test]
    async fn test_output_aligned_with_input_at_batch_size_one() {
        let embedder = RecordingEmbedder::new();
        let texts = texts_of_lengths(&[3, 7, 11, 2]);
        let limits = BatchLimits {
            max_items: 1,
            max_tokens: 1000,
        };

        let out = embed_batched(&embedder, texts.clone(), &limits).await.unwrap();

        assert_eq!(out.len(), texts.len());
        for (i, text) in texts.iter().enumerate() {
            assert_eq!(out[i], vec![text.len() as f32]);
        }
        assert_eq!(embedder.batch_sizes(), vec![1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn test_greedy_batching_respects_item_cap() {
        let embedder = RecordingEmbedder::new();
        let texts = texts_of_lengths(&[4; 7]);
        let limits = BatchLimits {
            max_items: 3,
            max_tokens: 1000,
        };

        let out = embed_batched(&embedder, texts, &limits).await.unwrap();

        assert_eq!(out.len(), 7);
        assert_eq!(embedder.batch_sizes(), vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_greedy_batching_respects_token_cap() {
        let embedder = RecordingEmbedder::new();
        // 40 chars -> 10 tokens each; cap 25 tokens -> two per batch
        let texts = texts_of_lengths(&[40, 40, 40, 40, 40]);
        let limits = BatchLimits {
            max_items: 100,
            max_tokens: 25,
        };

        let out = embed_batched(&embedder, texts, &limits).await.unwrap();

        assert_eq!(out.len(), 5);
        assert_eq!(embedder.batch_sizes(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_oversized_item_goes_out_as_singleton() {
        let embedder = RecordingEmbedder::new();
        // middle item estimates at 250 tokens, over the 100-token cap
        let texts = texts_of_lengths(&[40, 1000, 40, 40]);
        let limits = BatchLimits {
            max_items: 100,
            max_tokens: 100,
        };

        let out = embed_batched(&embedder, texts.clone(), &limits).await.unwrap();

        assert_eq!(out.len(), 4);
        assert_eq!(embedder.batch_sizes(), vec![1, 1, 2]);
        // alignment survives the flush-around-the-singleton dance
        for (i, text) in texts.iter().enumerate() {
            assert_eq!(out[i], vec![text.len() as f32]);
        }
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_calls() {
        let embedder = RecordingEmbedder::new();
        let limits = BatchLimits {
            max_items: 3,
            max_tokens: 100,
        };

        let out = embed_batched(&embedder, Vec::new(), &limits).await.unwrap();

        assert!(out.is_empty());
        assert!(embedder.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_aborts_whole_operation() {
        let embedder = RecordingEmbedder::failing_on(2);
        let texts = texts_of_lengths(&[4; 6]);
        let limits = BatchLimits {
            max_items: 2,
            max_tokens: 1000,
        };

        let err = embed_batched(&embedder, texts, &limits).await.unwrap_err();

        assert!(matches!(err, Error::Embedding(_)));
        // only the first batch went through before the abort
        assert_eq!(embedder.batch_sizes(), vec![2]);
    }
}
