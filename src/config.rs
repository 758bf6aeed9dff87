//! Configuration for the knowledge engine and the clinical layer.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::retry::RetryPolicy;

/// Configuration parameters for the knowledge engine.
///
/// Construct via [`EngineConfig::builder()`], which validates parameter
/// consistency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Chunk window size in characters.
    pub chunk_window: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Default number of top results returned by a search.
    pub top_k: usize,
    /// Default context budget for generation, in approximate tokens.
    pub max_context_tokens: usize,
    /// Hits below this cosine similarity are excluded from the context.
    pub similarity_threshold: f32,
    /// Maximum number of cached answers before LRU eviction.
    pub cache_capacity: usize,
    /// Identifier of the generative model, part of the cache fingerprint.
    pub generation_model: String,
    /// Sampling temperature passed to the generative model.
    pub temperature: f32,
    /// Maximum tokens the generative model may produce.
    pub max_output_tokens: usize,
    /// Backoff policy for embedding and generation calls.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_window: 500,
            chunk_overlap: 50,
            top_k: 5,
            max_context_tokens: 2048,
            similarity_threshold: 0.0,
            cache_capacity: 256,
            generation_model: "gpt-4o-mini".into(),
            temperature: 0.1,
            max_output_tokens: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Create a new builder for constructing an [`EngineConfig`].
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for a validated [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the chunk window size in characters.
    pub fn chunk_window(mut self, window: usize) -> Self {
        self.config.chunk_window = window;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the default number of top results per search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the default context budget in approximate tokens.
    pub fn max_context_tokens(mut self, tokens: usize) -> Self {
        self.config.max_context_tokens = tokens;
        self
    }

    /// Set the minimum similarity for context inclusion.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the cache entry-count ceiling.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    /// Set the generative model identifier.
    pub fn generation_model(mut self, model: impl Into<String>) -> Self {
        self.config.generation_model = model.into();
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Set the generation output token limit.
    pub fn max_output_tokens(mut self, tokens: usize) -> Self {
        self.config.max_output_tokens = tokens;
        self
    }

    /// Set the retry policy for provider calls.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the [`EngineConfig`], validating parameter consistency.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if:
    /// - `chunk_window == 0` or `chunk_overlap >= chunk_window`
    /// - `top_k == 0`
    /// - `max_context_tokens == 0`
    /// - `cache_capacity == 0`
    /// - `retry.max_attempts == 0`
    pub fn build(self) -> Result<EngineConfig> {
        let c = &self.config;
        if c.chunk_window == 0 {
            return Err(EngineError::Config("chunk_window must be positive".into()));
        }
        if c.chunk_overlap >= c.chunk_window {
            return Err(EngineError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_window ({})",
                c.chunk_overlap, c.chunk_window
            )));
        }
        if c.top_k == 0 {
            return Err(EngineError::Config("top_k must be at least 1".into()));
        }
        if c.max_context_tokens == 0 {
            return Err(EngineError::Config("max_context_tokens must be positive".into()));
        }
        if c.cache_capacity == 0 {
            return Err(EngineError::Config("cache_capacity must be positive".into()));
        }
        if c.retry.max_attempts == 0 {
            return Err(EngineError::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(self.config)
    }
}

/// Configuration for the clinical reasoning layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicalConfig {
    /// Category evidence is filtered toward for differential diagnosis.
    ///
    /// `None` searches the whole corpus.
    pub diagnosis_category: Option<String>,
    /// Candidates below this confidence are flagged low-confidence
    /// (never dropped).
    pub confidence_threshold: f32,
}

impl Default for ClinicalConfig {
    fn default() -> Self {
        Self { diagnosis_category: Some("clinical-guidelines".into()), confidence_threshold: 0.3 }
    }
}
