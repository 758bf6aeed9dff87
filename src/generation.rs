//! Generative-model provider seam and retrying client.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, Stage};
use crate::retry::{RetryPolicy, with_retry};

/// A prompt plus sampling parameters sent to a generative model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The full prompt text.
    pub prompt: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token limit.
    pub max_tokens: usize,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: usize,
    /// Tokens produced in the completion.
    pub completion_tokens: usize,
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    /// The generated text.
    pub text: String,
    /// Token usage, when the provider reports it.
    pub usage: TokenUsage,
}

/// A stream of generated text fragments.
///
/// Dropping the stream is the cancellation signal: the provider connection
/// is closed and no further tokens are consumed.
pub type GenerationStream = BoxStream<'static, Result<String>>;

/// A provider that turns prompts into generated text.
///
/// Callers should go through [`GenerationClient`], which adds bounded retry.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generate a completion for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;

    /// Generate a completion as a stream of text fragments.
    ///
    /// The default implementation runs [`generate`](Self::generate) to
    /// completion and yields the whole text as one fragment; backends with
    /// native streaming should override it.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<GenerationStream> {
        let generation = self.generate(request).await?;
        Ok(futures::stream::once(async move { Ok(generation.text) }).boxed())
    }
}

/// Generation client wrapping a provider with bounded backoff retry.
///
/// Retry applies to the non-streaming path only: once a stream has started
/// producing fragments there is no transparent way to replay it.
#[derive(Clone)]
pub struct GenerationClient {
    provider: Arc<dyn GenerationProvider>,
    policy: RetryPolicy,
}

impl GenerationClient {
    /// Wrap a provider with the given retry policy.
    pub fn new(provider: Arc<dyn GenerationProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Generate a completion with bounded retry on transient failures.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        debug!(model = %request.model, prompt_len = request.prompt.len(), "generation request");
        with_retry(&self.policy, Stage::Generation, || self.provider.generate(request)).await
    }

    /// Open a generation stream; the connection attempt itself is retried.
    pub async fn generate_stream(&self, request: &GenerationRequest) -> Result<GenerationStream> {
        with_retry(&self.policy, Stage::Generation, || self.provider.generate_stream(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProvider;

    #[async_trait]
    impl GenerationProvider for EchoProvider {
        async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
            Ok(Generation {
                text: format!("echo: {}", request.prompt),
                usage: TokenUsage { prompt_tokens: 1, completion_tokens: 2 },
            })
        }
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.into(),
            model: "echo".into(),
            temperature: 0.0,
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn default_stream_yields_full_text_once() {
        let provider = EchoProvider;
        let mut stream = provider.generate_stream(&request("hi")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, "echo: hi");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn client_passes_through_generation() {
        let client = GenerationClient::new(Arc::new(EchoProvider), RetryPolicy::none());
        let generation = client.generate(&request("q")).await.unwrap();
        assert_eq!(generation.text, "echo: q");
        assert_eq!(generation.usage.completion_tokens, 2);
    }
}
