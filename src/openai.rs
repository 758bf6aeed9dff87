//! OpenAI-backed embedding and generation providers.
//!
//! This module is only available when the `openai` feature is enabled.
//! Transient HTTP failures (connection errors, timeouts, 429, 5xx) surface
//! as retryable provider errors so the clients' backoff applies; other 4xx
//! responses are fatal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result, Stage};
use crate::generation::{Generation, GenerationProvider, GenerationRequest, TokenUsage};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// The default model for OpenAI embeddings.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// The default dimensionality for `text-embedding-3-small`.
const DEFAULT_DIMENSIONS: usize = 1536;

/// Documented batch ceiling of the embeddings endpoint.
const EMBEDDINGS_MAX_BATCH: usize = 2048;

fn api_key_from_env(stage: Stage) -> Result<String> {
    std::env::var("OPENAI_API_KEY").map_err(|_| EngineError::Provider {
        stage,
        message: "OPENAI_API_KEY environment variable not set".into(),
        retryable: false,
    })
}

/// Classify an HTTP transport failure.
fn transport_error(stage: Stage, e: &reqwest::Error) -> EngineError {
    error!(provider = "OpenAI", error = %e, "request failed");
    EngineError::Provider {
        stage,
        message: format!("request failed: {e}"),
        retryable: e.is_timeout() || e.is_connect(),
    }
}

/// Classify a non-success HTTP status, pulling the API error detail.
async fn status_error(stage: Stage, response: reqwest::Response) -> EngineError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    error!(provider = "OpenAI", %status, "API error");
    EngineError::Provider {
        stage,
        message: format!("API returned {status}: {detail}"),
        retryable: status.as_u16() == 429 || status.is_server_error(),
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── Embeddings ─────────────────────────────────────────────────────

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
///
/// # Configuration
///
/// - `model` – defaults to `text-embedding-3-small`.
/// - `dimensions` – optional Matryoshka dimension override.
/// - `api_key` – from the constructor or the `OPENAI_API_KEY` environment
///   variable.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::openai::OpenAIEmbedding;
///
/// let provider = OpenAIEmbedding::new("sk-...")?;
/// ```
pub struct OpenAIEmbedding {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    /// If set, passed to the API for Matryoshka dimension truncation.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbedding {
    /// Create a new provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(EngineError::Provider {
                stage: Stage::Embedding,
                message: "API key must not be empty".into(),
                retryable: false,
            });
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        })
    }

    /// Create a new provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env(Stage::Embedding)?)
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output dimensions (Matryoshka support).
    ///
    /// When set, the API returns embeddings truncated to this size and
    /// [`dimensions()`](EmbeddingProvider::dimensions) reports it.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }
}

#[derive(Serialize)]
struct EmbeddingApiRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = "OpenAI",
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let body = EmbeddingApiRequest {
            model: &self.model,
            input: texts.to_vec(),
            dimensions: self.request_dimensions,
        };
        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Stage::Embedding, &e))?;

        if !response.status().is_success() {
            return Err(status_error(Stage::Embedding, response).await);
        }

        let parsed: EmbeddingApiResponse = response.json().await.map_err(|e| {
            error!(provider = "OpenAI", error = %e, "failed to parse response");
            EngineError::Provider {
                stage: Stage::Embedding,
                message: format!("failed to parse response: {e}"),
                retryable: false,
            }
        })?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        EMBEDDINGS_MAX_BATCH
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ── Chat completions ───────────────────────────────────────────────

/// A [`GenerationProvider`] backed by the OpenAI chat completions API.
///
/// The model identifier comes from each [`GenerationRequest`], so one
/// provider instance serves every configured model.
pub struct OpenAIGeneration {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAIGeneration {
    /// Create a new provider with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(EngineError::Provider {
                stage: Stage::Generation,
                message: "API key must not be empty".into(),
                retryable: false,
            });
        }
        Ok(Self { client: reqwest::Client::new(), api_key })
    }

    /// Create a new provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env(Stage::Generation)?)
    }
}

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[async_trait]
impl GenerationProvider for OpenAIGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        debug!(
            provider = "OpenAI",
            model = %request.model,
            prompt_len = request.prompt.len(),
            "chat completion"
        );

        let body = ChatApiRequest {
            model: &request.model,
            messages: vec![ChatMessage { role: "user", content: &request.prompt }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };
        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(Stage::Generation, &e))?;

        if !response.status().is_success() {
            return Err(status_error(Stage::Generation, response).await);
        }

        let parsed: ChatApiResponse = response.json().await.map_err(|e| {
            error!(provider = "OpenAI", error = %e, "failed to parse response");
            EngineError::Provider {
                stage: Stage::Generation,
                message: format!("failed to parse response: {e}"),
                retryable: false,
            }
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Provider {
                stage: Stage::Generation,
                message: "API returned no choices".into(),
                retryable: false,
            })?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(Generation { text, usage })
    }
}
