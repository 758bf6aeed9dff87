//! Error types for the `medrag` crate.

use thiserror::Error;

/// The pipeline stage an error originated in.
///
/// Every error surfaced to a caller reports its stage so the caller can
/// tell a failed embedding call apart from a failed generation or a
/// validation rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Embedding-provider call.
    Embedding,
    /// Vector index search or metadata lookup.
    Search,
    /// Generative-model call.
    Generation,
    /// Structured-output schema validation.
    Validation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Embedding => write!(f, "embedding"),
            Stage::Search => write!(f, "search"),
            Stage::Generation => write!(f, "generation"),
            Stage::Validation => write!(f, "validation"),
        }
    }
}

/// Errors that can occur in retrieval, caching, and clinical reasoning.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An external provider exhausted its retry budget.
    ///
    /// Recoverable: the caller may retry the whole operation later.
    #[error("{stage} provider unavailable after {attempts} attempts: {message} (safe to retry)")]
    ProviderUnavailable {
        /// The stage whose provider failed.
        stage: Stage,
        /// How many attempts were made before giving up.
        attempts: u32,
        /// The last failure observed.
        message: String,
    },

    /// A single provider call failed.
    ///
    /// Retryable provider errors are consumed by the retry wrapper and only
    /// surface as [`EngineError::ProviderUnavailable`]; a non-retryable one
    /// (invalid request, content filtered) surfaces immediately.
    #[error("{stage} provider error: {message}")]
    Provider {
        /// The stage whose provider failed.
        stage: Stage,
        /// A description of the failure.
        message: String,
        /// Whether the same call may succeed if repeated.
        retryable: bool,
    },

    /// A vector's dimension does not match the index configuration.
    ///
    /// Fatal to the offending write; other entries are unaffected.
    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension the index was configured with.
        expected: usize,
        /// The dimension of the rejected vector.
        actual: usize,
    },

    /// A lookup missed. The caller decides the fallback.
    #[error("not found: {0}")]
    NotFound(String),

    /// The context budget cannot fit even the smallest retrieved chunk.
    ///
    /// A configuration error, fatal to the request.
    #[error(
        "context budget of {max_context_tokens} tokens cannot fit the smallest \
         retrieved chunk ({smallest_chunk_tokens} tokens)"
    )]
    ContextTooSmall {
        /// The requested context budget.
        max_context_tokens: usize,
        /// The approximate size of the smallest retrieved chunk.
        smallest_chunk_tokens: usize,
    },

    /// The generative model's output failed schema validation twice.
    ///
    /// Surfaced only after one corrective re-prompt; recoverable by the
    /// caller (e.g. re-issue with adjusted parameters).
    #[error("malformed model output: {0} (safe to retry)")]
    MalformedModelOutput(String),

    /// A configuration or argument validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A snapshot could not be persisted or restored.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// An I/O failure while persisting or restoring state.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization failure while persisting or restoring state.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// The pipeline stage this error occurred in, if it is stage-specific.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EngineError::ProviderUnavailable { stage, .. }
            | EngineError::Provider { stage, .. } => Some(*stage),
            EngineError::DimensionMismatch { .. } | EngineError::NotFound(_) => {
                Some(Stage::Search)
            }
            EngineError::MalformedModelOutput(_) => Some(Stage::Validation),
            _ => None,
        }
    }

    /// Whether the caller can safely retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::ProviderUnavailable { .. } | EngineError::MalformedModelOutput(_) => true,
            EngineError::Provider { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// A convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
