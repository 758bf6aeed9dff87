//! Deterministic mock providers for tests and examples.
//!
//! [`MockEmbedding`] maps identical text to identical vectors, so a query
//! equal to an ingested chunk scores a cosine similarity of 1.0.
//! [`MockGeneration`] replays scripted responses and counts calls, which is
//! how cache-hit and single-flight behavior is asserted.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result, Stage};
use crate::generation::{Generation, GenerationProvider, GenerationRequest, TokenUsage};

/// Embedding provider producing deterministic pseudo-random unit vectors.
pub struct MockEmbedding {
    dimension: usize,
    max_batch: usize,
}

impl MockEmbedding {
    /// Create a mock embedder for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension, max_batch: 64 }
    }

    /// Override the advertised maximum batch size.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Deterministic unit vector for a text.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v: Vec<f32> = (0..self.dimension)
            .map(|i| {
                // FNV-1a over the text plus the component index.
                let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
                for byte in text.as_bytes().iter().chain(&[i as u8]) {
                    hash ^= u64::from(*byte);
                    hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
                }
                (hash % 2000) as f32 / 1000.0 - 1.0
            })
            .collect();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch
    }

    fn model(&self) -> &str {
        "mock-embedding"
    }
}

/// Generation provider replaying scripted responses.
///
/// Responses are consumed front to back; once the script is exhausted the
/// fallback response is returned. Optionally fails the first `n` calls with
/// a retryable error to exercise backoff paths.
pub struct MockGeneration {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    calls: AtomicUsize,
    transient_failures: AtomicU32,
}

impl Default for MockGeneration {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGeneration {
    /// A mock that always answers with a fixed fallback.
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: "mock response".into(),
            calls: AtomicUsize::new(0),
            transient_failures: AtomicU32::new(0),
        }
    }

    /// Script a sequence of responses.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        *mock.responses.lock().unwrap() = responses.into_iter().map(Into::into).collect();
        mock
    }

    /// Set the fallback returned once the script is exhausted.
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Fail the first `n` calls with a retryable provider error.
    pub fn failing_first(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// How many generate calls reached the provider (including failed ones).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationProvider for MockGeneration {
    async fn generate(&self, _request: &GenerationRequest) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::Provider {
                stage: Stage::Generation,
                message: "injected transient failure".into(),
                retryable: true,
            });
        }

        let text = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Generation {
            text,
            usage: TokenUsage { prompt_tokens: 0, completion_tokens: 0 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_embeds_identically() {
        let mock = MockEmbedding::new(8);
        assert_eq!(mock.vector_for("fever"), mock.vector_for("fever"));
        assert_ne!(mock.vector_for("fever"), mock.vector_for("cough"));
    }

    #[test]
    fn vectors_are_unit_length() {
        let mock = MockEmbedding::new(16);
        let v = mock.vector_for("sepsis management");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn scripted_responses_are_replayed_in_order() {
        let mock = MockGeneration::with_responses(["one", "two"]).with_fallback("done");
        let request = GenerationRequest {
            prompt: String::new(),
            model: "mock".into(),
            temperature: 0.0,
            max_tokens: 8,
        };
        assert_eq!(mock.generate(&request).await.unwrap().text, "one");
        assert_eq!(mock.generate(&request).await.unwrap().text, "two");
        assert_eq!(mock.generate(&request).await.unwrap().text, "done");
        assert_eq!(mock.calls(), 3);
    }
}
