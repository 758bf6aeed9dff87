//! # medrag
//!
//! Medical knowledge retrieval and caching engine: document chunking,
//! embedding-based vector search, version-aware answer caching, and
//! retrieval-grounded generation, with a clinical reasoning layer for
//! differential diagnosis, treatment recommendation, risk assessment, and
//! follow-up planning.
//!
//! ## Architecture
//!
//! ```text
//! documents ──► SlidingWindowChunker ──► EmbeddingClient ──► VectorIndex
//!                                                               │
//! query ──► QueryCache ──► (miss) ──► search + MetadataStore ───┤
//!              │                                                ▼
//!              └──► (hit) ──► Answer          context packing + generation
//! ```
//!
//! [`KnowledgeEngine`] owns all shared state and is cheap to share behind an
//! [`Arc`](std::sync::Arc); every operation takes `&self`. The
//! [`ClinicalReasoner`] layers structured clinical workflows on top and keeps
//! no state of its own.
//!
//! ## Consistency
//!
//! Answers are cached against the index version they were computed at, and
//! every index mutation sweeps stale entries before it is acknowledged. A
//! query issued after an ingestion therefore never sees pre-ingestion
//! retrieval output.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use medrag::{AnswerRequest, DocumentMetadata, EngineConfig, KnowledgeEngine};
//! use medrag::mock::{MockEmbedding, MockGeneration};
//!
//! # async fn run() -> medrag::Result<()> {
//! let engine = KnowledgeEngine::builder()
//!     .config(EngineConfig::default())
//!     .embedding_provider(Arc::new(MockEmbedding::new(64)))
//!     .generation_provider(Arc::new(MockGeneration::new()))
//!     .build()?;
//!
//! let metadata = DocumentMetadata::new("Sepsis Management", "clinical-handbook")
//!     .with_category("clinical-guidelines");
//! engine.ingest("Early broad-spectrum antibiotics ...", metadata).await?;
//!
//! let answer = engine
//!     .answer(AnswerRequest::new("first-line treatment for sepsis"))
//!     .await?;
//! println!("{} ({} citations)", answer.text, answer.citations.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `openai`: HTTP providers for the OpenAI embeddings and chat completions
//!   APIs, via `reqwest`.

pub mod cache;
pub mod chunking;
pub mod clinical;
pub mod config;
pub mod document;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generation;
pub mod index;
pub mod metadata;
pub mod mock;
#[cfg(feature = "openai")]
pub mod openai;
pub mod retry;

pub use cache::{CacheEntry, Fingerprint, QueryCache};
pub use chunking::{Chunker, SlidingWindowChunker};
pub use clinical::{
    CaseRequest, Checkpoint, ClinicalCaseResult, ClinicalReasoner, Contraindication,
    DiagnosisCandidate, DifferentialDiagnosis, DifferentialRequest, FollowUpPlan, FollowUpRequest,
    PatientInfo, RiskAssessment, RiskLevel, RiskRequest, TimeFrame, TreatmentOption, TreatmentPlan,
    TreatmentRequest,
};
pub use config::{ClinicalConfig, EngineConfig, EngineConfigBuilder};
pub use document::{
    Chunk, Citation, Document, DocumentMetadata, MetadataFilter, RetrievalResult, SearchHit,
};
pub use embedding::{EmbeddingClient, EmbeddingProvider};
pub use engine::{
    Answer, AnswerRequest, AnswerStream, EngineStats, IngestReceipt, KnowledgeEngine,
    KnowledgeEngineBuilder, NO_EVIDENCE_ANSWER,
};
pub use error::{EngineError, Result, Stage};
pub use generation::{
    Generation, GenerationClient, GenerationProvider, GenerationRequest, GenerationStream,
    TokenUsage,
};
pub use index::{IndexStats, VectorIndex};
pub use metadata::{ChunkRecord, MetadataStore};
pub use retry::RetryPolicy;
