//! The knowledge engine: retrieval orchestration over index, metadata
//! store, and query cache.
//!
//! [`KnowledgeEngine`] is the one service object owning all shared state.
//! It is constructed once per process via [`KnowledgeEngine::builder()`],
//! loads snapshots on start ([`load`](KnowledgeEngine::load)) and flushes
//! them on stop ([`save`](KnowledgeEngine::save)).
//!
//! Cache consistency is synchronous: every ingestion or deletion sweeps
//! stale cache entries before returning, so a subsequent answer can never
//! observe retrieval output that predates the mutation.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheEntry, Fingerprint, QueryCache};
use crate::chunking::{Chunker, SlidingWindowChunker};
use crate::config::EngineConfig;
use crate::document::{
    Citation, Document, DocumentMetadata, MetadataFilter, RetrievalResult, SearchHit,
};
use crate::embedding::{EmbeddingClient, EmbeddingProvider};
use crate::error::{EngineError, Result};
use crate::generation::{
    GenerationClient, GenerationProvider, GenerationRequest, GenerationStream,
};
use crate::index::{FilterFields, IndexEntry, VectorIndex};
use crate::metadata::{ChunkRecord, MetadataStore};

/// Answer text returned when retrieval produces no evidence.
pub const NO_EVIDENCE_ANSWER: &str =
    "No supporting evidence was found in the knowledge corpus for this query.";

const INDEX_SNAPSHOT_FILE: &str = "index.json";
const METADATA_SNAPSHOT_FILE: &str = "metadata.json";

/// Approximate token count of a text. The context budget is a bound, not an
/// exact tokenizer: four characters per token.
pub(crate) fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// A query against the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequest {
    /// The natural-language query. Original casing is preserved for
    /// generation; normalization applies to fingerprinting only.
    pub query: String,
    /// Optional metadata filter restricting the searched corpus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<MetadataFilter>,
    /// Result count override; engine default when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    /// Context budget override in approximate tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<usize>,
}

impl AnswerRequest {
    /// A request with engine defaults for everything but the query.
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), filter: None, top_k: None, max_context_tokens: None }
    }

    /// Restrict the search with a metadata filter.
    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Override the result count.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Override the context budget.
    pub fn with_max_context_tokens(mut self, tokens: usize) -> Self {
        self.max_context_tokens = Some(tokens);
        self
    }
}

/// A grounded answer with its citations and the retrieval it was built on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// The generated (or no-evidence) answer text.
    pub text: String,
    /// Citations for the chunks packed into the context.
    pub citations: Vec<Citation>,
    /// The retrieval output the answer was grounded on.
    pub retrieval: RetrievalResult,
    /// `false` when no evidence matched and the model was never called.
    pub grounded: bool,
    /// Whether this answer was served from the cache.
    pub cached: bool,
}

/// A streamed answer: retrieval and citations up front, text as fragments.
pub struct AnswerStream {
    /// Citations for the packed context.
    pub citations: Vec<Citation>,
    /// The retrieval output the stream is grounded on.
    pub retrieval: RetrievalResult,
    /// `false` when no evidence matched.
    pub grounded: bool,
    /// Text fragments; dropping the stream cancels generation.
    pub stream: GenerationStream,
}

/// Result of ingesting one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// The (possibly newly assigned) document id.
    pub document_id: String,
    /// Ids of the chunks created, in order.
    pub chunk_ids: Vec<String>,
}

/// Aggregate engine counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Distinct documents in the corpus.
    pub documents: usize,
    /// Indexed chunks.
    pub chunks: usize,
    /// Live cache entries.
    pub cache_entries: usize,
    /// Current index version.
    pub index_version: u64,
}

/// The retrieval orchestrator.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::{KnowledgeEngine, EngineConfig, AnswerRequest};
///
/// let engine = KnowledgeEngine::builder()
///     .config(EngineConfig::default())
///     .embedding_provider(Arc::new(embedder))
///     .generation_provider(Arc::new(generator))
///     .build()?;
///
/// engine.ingest(text, metadata).await?;
/// let answer = engine.answer(AnswerRequest::new("first-line sepsis treatment")).await?;
/// ```
pub struct KnowledgeEngine {
    config: EngineConfig,
    chunker: Arc<dyn Chunker>,
    embedder: EmbeddingClient,
    generator: GenerationClient,
    index: VectorIndex,
    metadata: MetadataStore,
    cache: QueryCache,
}

impl KnowledgeEngine {
    /// Create a new [`KnowledgeEngineBuilder`].
    pub fn builder() -> KnowledgeEngineBuilder {
        KnowledgeEngineBuilder::default()
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The vector index (read access for diagnostics).
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// The metadata store.
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    // ── Ingestion path ─────────────────────────────────────────────

    /// Ingest raw text as a new document; assigns a fresh document id.
    pub async fn ingest(
        &self,
        text: impl Into<String>,
        metadata: DocumentMetadata,
    ) -> Result<IngestReceipt> {
        let document =
            Document { id: Uuid::new_v4().to_string(), text: text.into(), metadata };
        self.ingest_document(document).await
    }

    /// Ingest (or re-ingest) a document with a caller-chosen id.
    ///
    /// Re-ingesting an existing id replaces all of its chunks. Chunking is
    /// deterministic, so re-ingesting identical text yields identical chunk
    /// boundaries. All-or-nothing: an embedding failure leaves index, store,
    /// and cache untouched.
    pub async fn ingest_document(&self, document: Document) -> Result<IngestReceipt> {
        document.metadata.validate()?;

        let chunks = self.chunker.chunk(&document);
        if chunks.is_empty() {
            info!(document_id = %document.id, chunk_count = 0, "ingested empty document");
            return Ok(IngestReceipt { document_id: document.id, chunk_ids: Vec::new() });
        }

        // Embed before touching any shared state.
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        let fields = FilterFields {
            document_id: document.id.clone(),
            category: document.metadata.category.clone(),
            specialty: document.metadata.specialty.clone(),
            source: document.metadata.source.clone(),
        };
        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                chunk_id: chunk.id.clone(),
                vector,
                fields: fields.clone(),
            })
            .collect();
        let records: Vec<ChunkRecord> = chunks
            .iter()
            .map(|chunk| ChunkRecord {
                chunk: chunk.clone(),
                metadata: document.metadata.clone(),
            })
            .collect();
        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        // Re-import: old chunks of the same document are invalidated first.
        let replaced = self.index.delete_document(&document.id).await;
        if replaced > 0 {
            self.metadata.remove_document(&document.id).await;
            debug!(document_id = %document.id, replaced, "replaced chunks on re-ingest");
        }

        let version = self.index.insert_batch(entries).await?;
        self.metadata.put_batch(records).await;

        // Synchronous invalidation: acknowledged only after the sweep.
        self.cache.invalidate_below(version).await;

        info!(document_id = %document.id, chunk_count = chunk_ids.len(), "ingested document");
        Ok(IngestReceipt { document_id: document.id, chunk_ids })
    }

    /// Remove a document and all of its chunks.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the document is unknown.
    pub async fn remove_document(&self, document_id: &str) -> Result<()> {
        let removed_chunks = self.metadata.remove_document(document_id).await;
        if removed_chunks.is_empty() {
            return Err(EngineError::NotFound(format!("document '{document_id}'")));
        }
        self.index.delete_document(document_id).await;
        let version = self.index.version().await;
        self.cache.invalidate_below(version).await;
        info!(document_id, chunks = removed_chunks.len(), "removed document");
        Ok(())
    }

    // ── Query path ─────────────────────────────────────────────────

    /// Answer a query: cache → retrieval → context packing → generation.
    ///
    /// On a cache hit no provider call is made. On a miss, computation for
    /// the fingerprint is serialized so concurrent identical queries share
    /// one generation.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Config`] for `top_k == 0` or a zero context budget.
    /// - [`EngineError::ContextTooSmall`] if evidence was found but not even
    ///   the smallest chunk fits the budget.
    /// - [`EngineError::ProviderUnavailable`] once provider retries are
    ///   exhausted.
    pub async fn answer(&self, request: AnswerRequest) -> Result<Answer> {
        let top_k = request.top_k.unwrap_or(self.config.top_k);
        let budget = request.max_context_tokens.unwrap_or(self.config.max_context_tokens);
        if top_k == 0 {
            return Err(EngineError::Config("top_k must be at least 1".into()));
        }
        if budget == 0 {
            return Err(EngineError::Config("max_context_tokens must be positive".into()));
        }

        let fingerprint = Fingerprint::new(
            &request.query,
            request.filter.as_ref(),
            top_k,
            &self.config.generation_model,
        );

        // Serialize compute-and-fill per fingerprint: a second identical
        // query waits here, then observes the first one's cache write.
        let _guard = self.cache.lock_fingerprint(&fingerprint).await;

        let version = self.index.version().await;
        if let Some(entry) = self.cache.get(&fingerprint, version).await {
            debug!(query = %fingerprint.query, "cache hit");
            return Ok(Answer {
                text: entry.answer,
                citations: entry.citations,
                retrieval: entry.retrieval,
                grounded: entry.grounded,
                cached: true,
            });
        }

        let (retrieval, packed) =
            self.retrieve_and_pack(&request.query, request.filter.as_ref(), top_k, budget).await?;

        let (text, citations, grounded) = if packed.is_empty() {
            // No evidence: never call the model ungrounded.
            debug!(query = %fingerprint.query, "no supporting evidence");
            (NO_EVIDENCE_ANSWER.to_string(), Vec::new(), false)
        } else {
            let prompt = build_prompt(&request.query, &packed);
            let generation = self
                .generator
                .generate(&GenerationRequest {
                    prompt,
                    model: self.config.generation_model.clone(),
                    temperature: self.config.temperature,
                    max_tokens: self.config.max_output_tokens,
                })
                .await?;
            let citations = packed.iter().map(|record| record.citation()).collect();
            (generation.text, citations, true)
        };

        // Cache only if the observed version is still current; a stale
        // result is still returned to the caller but never cached as
        // current.
        let current = self.index.version().await;
        if current == retrieval.index_version {
            self.cache
                .put(
                    fingerprint,
                    CacheEntry {
                        retrieval: retrieval.clone(),
                        answer: text.clone(),
                        citations: citations.clone(),
                        grounded,
                        index_version: retrieval.index_version,
                        created_at: Utc::now(),
                    },
                )
                .await;
        } else {
            debug!(
                observed = retrieval.index_version,
                current, "index advanced during answer, discarding cache write"
            );
        }

        Ok(Answer { text, citations, retrieval, grounded, cached: false })
    }

    /// Answer a query as a fragment stream.
    ///
    /// Follows the same retrieval path as [`answer`](Self::answer) but
    /// bypasses the cache (streams are not memoized). Dropping the returned
    /// stream cancels generation without touching shared state.
    pub async fn answer_stream(&self, request: AnswerRequest) -> Result<AnswerStream> {
        let top_k = request.top_k.unwrap_or(self.config.top_k);
        let budget = request.max_context_tokens.unwrap_or(self.config.max_context_tokens);
        if top_k == 0 {
            return Err(EngineError::Config("top_k must be at least 1".into()));
        }
        if budget == 0 {
            return Err(EngineError::Config("max_context_tokens must be positive".into()));
        }

        let (retrieval, packed) =
            self.retrieve_and_pack(&request.query, request.filter.as_ref(), top_k, budget).await?;

        if packed.is_empty() {
            let text = NO_EVIDENCE_ANSWER.to_string();
            return Ok(AnswerStream {
                citations: Vec::new(),
                retrieval,
                grounded: false,
                stream: Box::pin(futures::stream::once(async move { Ok(text) })),
            });
        }

        let prompt = build_prompt(&request.query, &packed);
        let stream = self
            .generator
            .generate_stream(&GenerationRequest {
                prompt,
                model: self.config.generation_model.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_output_tokens,
            })
            .await?;
        let citations = packed.iter().map(|record| record.citation()).collect();

        Ok(AnswerStream { citations, retrieval, grounded: true, stream })
    }

    /// Embed the query, search, join metadata, and pack the context.
    ///
    /// Returns the full retrieval result plus the packed chunk records in
    /// descending score order.
    async fn retrieve_and_pack(
        &self,
        query: &str,
        filter: Option<&MetadataFilter>,
        top_k: usize,
        budget: usize,
    ) -> Result<(RetrievalResult, Vec<ChunkRecord>)> {
        let query_vector = self.embedder.embed(query).await?;
        let (version, scored) = self.index.search(&query_vector, top_k, filter).await?;

        let mut hits = Vec::with_capacity(scored.len());
        let mut records = Vec::with_capacity(scored.len());
        for s in scored {
            if s.score < self.config.similarity_threshold {
                continue;
            }
            match self.metadata.get(&s.chunk_id).await {
                Ok(record) => {
                    hits.push(SearchHit { chunk: record.chunk.clone(), score: s.score });
                    records.push(record);
                }
                Err(EngineError::NotFound(_)) => {
                    // Concurrent delete between scan and join; skip the hit.
                    warn!(chunk_id = %s.chunk_id, "indexed chunk missing from metadata store");
                }
                Err(other) => return Err(other),
            }
        }
        let retrieval = RetrievalResult { hits, index_version: version };

        if retrieval.is_empty() {
            return Ok((retrieval, Vec::new()));
        }

        // Greedy packing in descending score order; whole chunks only.
        let mut packed = Vec::new();
        let mut used = 0usize;
        let mut smallest = usize::MAX;
        for record in records {
            let cost = estimate_tokens(&record.chunk.text);
            smallest = smallest.min(cost);
            if used + cost <= budget {
                used += cost;
                packed.push(record);
            }
        }
        if packed.is_empty() {
            return Err(EngineError::ContextTooSmall {
                max_context_tokens: budget,
                smallest_chunk_tokens: smallest,
            });
        }

        debug!(
            packed = packed.len(),
            retrieved = retrieval.hits.len(),
            used_tokens = used,
            budget,
            "packed context"
        );
        Ok((retrieval, packed))
    }

    // ── Persistence & observability ────────────────────────────────

    /// Flush index and metadata snapshots into a directory.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Snapshot`] if either snapshot cannot be
    /// written.
    pub async fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await?;
        self.index
            .save(dir.join(INDEX_SNAPSHOT_FILE))
            .await
            .map_err(|e| EngineError::Snapshot(format!("index: {e}")))?;
        self.metadata
            .save(dir.join(METADATA_SNAPSHOT_FILE))
            .await
            .map_err(|e| EngineError::Snapshot(format!("metadata: {e}")))?;
        info!(dir = %dir.display(), "flushed engine snapshots");
        Ok(())
    }

    /// Restore index and metadata from a directory written by
    /// [`save`](Self::save). Clears the cache.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Snapshot`] if either snapshot is missing,
    /// unreadable, or was taken at a different vector dimension.
    pub async fn load(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        self.index
            .load(dir.join(INDEX_SNAPSHOT_FILE))
            .await
            .map_err(|e| EngineError::Snapshot(format!("index: {e}")))?;
        self.metadata
            .load(dir.join(METADATA_SNAPSHOT_FILE))
            .await
            .map_err(|e| EngineError::Snapshot(format!("metadata: {e}")))?;
        self.cache.clear().await;
        info!(dir = %dir.display(), "restored engine snapshots");
        Ok(())
    }

    /// Aggregate counters.
    pub async fn stats(&self) -> EngineStats {
        let index_stats = self.index.stats().await;
        EngineStats {
            documents: index_stats.documents,
            chunks: index_stats.entries,
            cache_entries: self.cache.len().await,
            index_version: index_stats.version,
        }
    }
}

/// Build the generation prompt from the query and packed evidence.
fn build_prompt(query: &str, packed: &[ChunkRecord]) -> String {
    let mut prompt = String::from(
        "You are a medical knowledge assistant. Answer the question using only \
         the numbered sources below and cite them as [1], [2], and so on. If \
         the sources do not contain the answer, say so explicitly.\n\n",
    );
    for (i, record) in packed.iter().enumerate() {
        prompt.push_str(&format!(
            "Source [{}] ({} — {}):\n{}\n\n",
            i + 1,
            record.metadata.title,
            record.metadata.source,
            record.chunk.text
        ));
    }
    prompt.push_str(&format!("Question: {query}\n"));
    prompt
}

/// Builder for a [`KnowledgeEngine`].
///
/// `config`, `embedding_provider`, and `generation_provider` are required;
/// the chunker defaults to a [`SlidingWindowChunker`] built from the config.
#[derive(Default)]
pub struct KnowledgeEngineBuilder {
    config: Option<EngineConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generation_provider: Option<Arc<dyn GenerationProvider>>,
    chunker: Option<Arc<dyn Chunker>>,
}

impl KnowledgeEngineBuilder {
    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the generative-model provider.
    pub fn generation_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.generation_provider = Some(provider);
        self
    }

    /// Override the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Build the engine, validating that all required parts are present.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if a required field is missing or
    /// the configuration is inconsistent.
    pub fn build(self) -> Result<KnowledgeEngine> {
        let config = self
            .config
            .ok_or_else(|| EngineError::Config("config is required".into()))?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| EngineError::Config("embedding_provider is required".into()))?;
        let generation_provider = self
            .generation_provider
            .ok_or_else(|| EngineError::Config("generation_provider is required".into()))?;
        let chunker: Arc<dyn Chunker> = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(SlidingWindowChunker::new(
                config.chunk_window,
                config.chunk_overlap,
            )?),
        };

        let dimension = embedding_provider.dimensions();
        Ok(KnowledgeEngine {
            embedder: EmbeddingClient::new(embedding_provider, config.retry.clone()),
            generator: GenerationClient::new(generation_provider, config.retry.clone()),
            index: VectorIndex::new(dimension),
            metadata: MetadataStore::new(),
            cache: QueryCache::new(config.cache_capacity),
            chunker,
            config,
        })
    }
}
