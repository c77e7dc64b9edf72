//! Embedding provider adapter (C1, spec.md §4.3).
//!
//! Grounded in the teacher's OpenAI embedding call shape
//! (`generate_embedding_with_params`): this crate supplies the
//! `EmbeddingProvider` trait boundary the rest of the workspace depends on,
//! plus an OpenAI-backed implementation and a fixed test double.

use std::sync::Arc;

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::error::AppError;

/// Adapter boundary for turning text into fixed-dimension vectors
/// (spec.md §4.3). Batched calls must preserve order 1:1.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;
    fn dimension(&self) -> usize;
}

/// OpenAI-backed provider, retried with exponential backoff on the
/// retryable kinds (`EmbedRateLimited`, `EmbedUnavailable`), and bounded to
/// a global concurrency limit the same way `RerankerPool` bounds reranking
/// concurrency.
pub struct OpenAiEmbeddingProvider {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: u32,
    max_batch: usize,
    semaphore: Arc<Semaphore>,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        client: Client<OpenAIConfig>,
        model: String,
        dimensions: u32,
        max_concurrency: usize,
        max_batch: usize,
    ) -> Self {
        Self {
            client,
            model,
            dimensions,
            max_batch: max_batch.max(1),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AppError::InternalError("embedding semaphore closed".into()))?;

        let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);

        Retry::spawn(retry_strategy, || async {
            let request = CreateEmbeddingRequestArgs::default()
                .model(self.model.clone())
                .dimensions(self.dimensions)
                .input(batch.to_vec())
                .build()
                .map_err(AppError::OpenAI)?;

            let response = self.client.embeddings().create(request).await.map_err(|e| {
                debug!(error = %e, "embedding request failed");
                AppError::OpenAI(e)
            })?;

            let mut by_index: Vec<Option<Vec<f32>>> = vec![None; batch.len()];
            for datum in response.data {
                if let Some(slot) = by_index.get_mut(datum.index as usize) {
                    *slot = Some(datum.embedding);
                }
            }

            by_index
                .into_iter()
                .enumerate()
                .map(|(i, v)| {
                    v.ok_or_else(|| {
                        AppError::EmbedRejected(format!("no embedding returned for input {i}"))
                    })
                })
                .collect()
        })
        .await
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_batch) {
            out.extend(self.embed_batch(chunk).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimensions as usize
    }
}

/// Deterministic test double: hashes each input string into a fixed-length
/// vector so unit tests can assert on stable embeddings without a network
/// call.
pub struct FixedEmbeddingProvider {
    dimension: usize,
}

impl FixedEmbeddingProvider {
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0_f32; self.dimension];
        for (i, word) in text.split_whitespace().enumerate() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            i.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts.iter().map(|t| self.hash_embed(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_provider_preserves_order_and_dimension() {
        let provider = FixedEmbeddingProvider::new(16);
        let texts = vec!["token refresh".to_string(), "graph traversal".to_string()];
        let vectors = provider.embed(&texts).await.unwrap();

        assert_eq!(vectors.len(), 2);
        for v in &vectors {
            assert_eq!(v.len(), 16);
        }
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn fixed_provider_is_deterministic() {
        let provider = FixedEmbeddingProvider::new(8);
        let a = provider.embed(&["same text".to_string()]).await.unwrap();
        let b = provider.embed(&["same text".to_string()]).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        let provider = FixedEmbeddingProvider::new(8);
        let out = provider.embed(&[]).await.unwrap();
        assert!(out.is_empty());
    }
}
