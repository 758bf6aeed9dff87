//! Embedding provider seam and the batching/retrying client.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{EngineError, Result, Stage};
use crate::retry::{RetryPolicy, with_retry};

/// A provider that converts text to fixed-length vectors.
///
/// Implementations wrap specific backends behind a unified async interface.
/// Callers should go through [`EmbeddingClient`], which adds batch splitting
/// and bounded retry on top of this trait.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, preserving input order and length.
    ///
    /// The batch is guaranteed to be at most [`max_batch_size`](Self::max_batch_size)
    /// entries when called through [`EmbeddingClient`].
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// The dimensionality of vectors produced by this provider.
    fn dimensions(&self) -> usize;

    /// The largest batch the backend accepts in one request.
    fn max_batch_size(&self) -> usize {
        64
    }

    /// Identifier of the embedding model.
    fn model(&self) -> &str;
}

/// Embedding client with transparent batch splitting and bounded retry.
///
/// Oversized batches are split at the provider's cap and recombined in
/// order. Each sub-batch is retried independently under the policy, but the
/// call is all-or-nothing: any sub-batch exhausting its retries fails the
/// whole call, and nothing is returned for the caller to partially write.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
}

impl EmbeddingClient {
    /// Wrap a provider with the given retry policy.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// The dimensionality of vectors produced by the wrapped provider.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Identifier of the embedding model.
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text]).await?;
        vectors.pop().ok_or_else(|| EngineError::Provider {
            stage: Stage::Embedding,
            message: "provider returned an empty batch".into(),
            retryable: false,
        })
    }

    /// Embed a batch of texts, preserving order and length.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ProviderUnavailable`] once retries are exhausted.
    /// - [`EngineError::DimensionMismatch`] if the provider returns vectors
    ///   of the wrong dimension.
    /// - [`EngineError::Provider`] if the batch comes back with the wrong
    ///   length (structural, not retried).
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let cap = self.provider.max_batch_size().max(1);
        let expected_dim = self.provider.dimensions();
        let mut vectors = Vec::with_capacity(texts.len());

        for sub_batch in texts.chunks(cap) {
            debug!(
                model = self.provider.model(),
                batch_size = sub_batch.len(),
                "embedding batch"
            );
            let batch_vectors = with_retry(&self.policy, Stage::Embedding, || {
                self.provider.embed_batch(sub_batch)
            })
            .await?;

            if batch_vectors.len() != sub_batch.len() {
                return Err(EngineError::Provider {
                    stage: Stage::Embedding,
                    message: format!(
                        "provider returned {} vectors for a batch of {}",
                        batch_vectors.len(),
                        sub_batch.len()
                    ),
                    retryable: false,
                });
            }
            for vector in &batch_vectors {
                if vector.len() != expected_dim {
                    return Err(EngineError::DimensionMismatch {
                        expected: expected_dim,
                        actual: vector.len(),
                    });
                }
            }
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Records the batch sizes it was called with; embeds each text as a
    /// one-hot of its length.
    struct RecordingProvider {
        cap: usize,
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 0.0]).collect())
        }

        fn dimensions(&self) -> usize {
            3
        }

        fn max_batch_size(&self) -> usize {
            self.cap
        }

        fn model(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn oversized_batches_are_split_and_recombined_in_order() {
        let provider = Arc::new(RecordingProvider { cap: 2, batches: Mutex::new(Vec::new()) });
        let client = EmbeddingClient::new(provider.clone(), RetryPolicy::none());

        let texts = ["a", "bb", "ccc", "dddd", "eeeee"];
        let vectors = client.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 5);
        for (text, vector) in texts.iter().zip(&vectors) {
            assert_eq!(vector[0], text.len() as f32);
        }
        assert_eq!(*provider.batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn empty_batch_makes_no_provider_calls() {
        let provider = Arc::new(RecordingProvider { cap: 4, batches: Mutex::new(Vec::new()) });
        let client = EmbeddingClient::new(provider.clone(), RetryPolicy::none());
        assert!(client.embed_batch(&[]).await.unwrap().is_empty());
        assert!(provider.batches.lock().unwrap().is_empty());
    }

    struct WrongDimProvider;

    #[async_trait]
    impl EmbeddingProvider for WrongDimProvider {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![0.0; 2]).collect())
        }

        fn dimensions(&self) -> usize {
            3
        }

        fn model(&self) -> &str {
            "wrong-dim"
        }
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let client = EmbeddingClient::new(Arc::new(WrongDimProvider), RetryPolicy::none());
        let result = client.embed("x").await;
        assert!(matches!(
            result,
            Err(EngineError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }
}
