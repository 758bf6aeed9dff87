//! In-memory vector index with exact cosine-similarity search.
//!
//! Entries live in insertion order behind a `tokio::sync::RwLock`: searches
//! hold the read lock for the duration of a scan and observe one consistent
//! version; insert/delete hold the write lock. Exact full-scan k-NN is the
//! intended algorithm at the target corpus scale (tens of thousands of
//! chunks).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::document::MetadataFilter;
use crate::error::{EngineError, Result};

/// Filterable fields denormalized into the index so a filtered search never
/// leaves the scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterFields {
    /// Parent document id, used for cascade deletion.
    pub document_id: String,
    /// Document category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Document specialty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    /// Document source.
    pub source: String,
}

impl FilterFields {
    fn matches(&self, filter: &MetadataFilter) -> bool {
        if let Some(category) = &filter.category {
            if self.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(specialty) = &filter.specialty {
            if self.specialty.as_deref() != Some(specialty.as_str()) {
                return false;
            }
        }
        if let Some(source) = &filter.source {
            if self.source != *source {
                return false;
            }
        }
        true
    }
}

/// One entry in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The chunk this vector belongs to.
    pub chunk_id: String,
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// Denormalized fields for filtered search.
    pub fields: FilterFields,
}

/// A scored chunk id produced by a search. The engine joins these against
/// the metadata store to build full hits.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    /// The matching chunk.
    pub chunk_id: String,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

/// Serializable snapshot of the full index state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Configured vector dimension.
    pub dimension: usize,
    /// Version counter at snapshot time.
    pub version: u64,
    /// All entries, in insertion order.
    pub entries: Vec<IndexEntry>,
}

/// Aggregate counters for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of entries.
    pub entries: usize,
    /// Number of distinct documents.
    pub documents: usize,
    /// Current version.
    pub version: u64,
}

#[derive(Debug, Default)]
struct IndexState {
    /// Insertion-ordered entries; order is the search tie-breaker.
    entries: Vec<IndexEntry>,
    /// chunk_id → position in `entries`.
    positions: HashMap<String, usize>,
    /// Bumped on every successful mutation.
    version: u64,
}

/// In-memory vector index carrying a monotonically increasing version.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::index::VectorIndex;
///
/// let index = VectorIndex::new(384);
/// index.insert("doc_0", vector, fields).await?;
/// let hits = index.search(&query, 5, None).await?;
/// ```
#[derive(Debug)]
pub struct VectorIndex {
    dimension: usize,
    state: RwLock<IndexState>,
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl VectorIndex {
    /// Create an empty index for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension, state: RwLock::new(IndexState::default()) }
    }

    /// The configured vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The current version counter.
    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    /// Number of entries in the index.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Whether the index holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Insert or replace an entry. Bumps the version on success.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DimensionMismatch`] if the vector's length
    /// differs from the configured dimension; the index is unchanged.
    pub async fn insert(
        &self,
        chunk_id: impl Into<String>,
        vector: Vec<f32>,
        fields: FilterFields,
    ) -> Result<u64> {
        if vector.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let chunk_id = chunk_id.into();
        let mut state = self.state.write().await;
        let entry = IndexEntry { chunk_id: chunk_id.clone(), vector, fields };
        match state.positions.get(&chunk_id).copied() {
            Some(pos) => state.entries[pos] = entry,
            None => {
                let pos = state.entries.len();
                state.entries.push(entry);
                state.positions.insert(chunk_id, pos);
            }
        }
        state.version += 1;
        Ok(state.version)
    }

    /// Insert a batch of entries under a single write lock and version bump.
    ///
    /// All-or-nothing: every vector is dimension-checked before any entry is
    /// written.
    pub async fn insert_batch(
        &self,
        entries: Vec<IndexEntry>,
    ) -> Result<u64> {
        for entry in &entries {
            if entry.vector.len() != self.dimension {
                return Err(EngineError::DimensionMismatch {
                    expected: self.dimension,
                    actual: entry.vector.len(),
                });
            }
        }

        let mut state = self.state.write().await;
        for entry in entries {
            match state.positions.get(&entry.chunk_id).copied() {
                Some(pos) => state.entries[pos] = entry,
                None => {
                    let pos = state.entries.len();
                    state.positions.insert(entry.chunk_id.clone(), pos);
                    state.entries.push(entry);
                }
            }
        }
        state.version += 1;
        Ok(state.version)
    }

    /// Delete an entry. No-op if absent; bumps the version only when
    /// something was removed.
    ///
    /// Returns `true` if an entry was removed.
    pub async fn delete(&self, chunk_id: &str) -> bool {
        let mut state = self.state.write().await;
        if remove_entry(&mut state, chunk_id) {
            state.version += 1;
            true
        } else {
            false
        }
    }

    /// Remove every entry belonging to a document.
    ///
    /// Returns the number of entries removed; the version is bumped once if
    /// anything was removed.
    pub async fn delete_document(&self, document_id: &str) -> usize {
        let mut state = self.state.write().await;
        let ids: Vec<String> = state
            .entries
            .iter()
            .filter(|e| e.fields.document_id == document_id)
            .map(|e| e.chunk_id.clone())
            .collect();
        for id in &ids {
            remove_entry(&mut state, id);
        }
        if !ids.is_empty() {
            state.version += 1;
            debug!(document_id, removed = ids.len(), "removed document from index");
        }
        ids.len()
    }

    /// Exact k-NN search by cosine similarity.
    ///
    /// Returns at most `top_k` results in descending score order; ties keep
    /// insertion order (stable sort over the insertion-ordered scan). The
    /// scan holds the read lock throughout, so the returned
    /// `(version, hits)` pair is consistent. An empty (or fully filtered
    /// out) index yields an empty result, not an error.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Config`] if `top_k == 0`.
    /// - [`EngineError::DimensionMismatch`] for a wrong-dimension query.
    pub async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<(u64, Vec<ScoredId>)> {
        if top_k == 0 {
            return Err(EngineError::Config("top_k must be at least 1".into()));
        }
        if query.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let state = self.state.read().await;
        let mut scored: Vec<ScoredId> = state
            .entries
            .iter()
            .filter(|entry| filter.is_none_or(|f| entry.fields.matches(f)))
            .map(|entry| ScoredId {
                chunk_id: entry.chunk_id.clone(),
                score: cosine_similarity(&entry.vector, query),
            })
            .collect();

        // Stable sort preserves insertion order among equal scores.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok((state.version, scored))
    }

    /// Capture the full entry set and version counter.
    pub async fn snapshot(&self) -> IndexSnapshot {
        let state = self.state.read().await;
        IndexSnapshot {
            dimension: self.dimension,
            version: state.version,
            entries: state.entries.clone(),
        }
    }

    /// Replace the index contents from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DimensionMismatch`] if the snapshot was taken
    /// with a different dimension.
    pub async fn restore(&self, snapshot: IndexSnapshot) -> Result<()> {
        if snapshot.dimension != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: snapshot.dimension,
            });
        }
        let mut state = self.state.write().await;
        state.positions = snapshot
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.chunk_id.clone(), pos))
            .collect();
        state.entries = snapshot.entries;
        state.version = snapshot.version;
        info!(entries = state.entries.len(), version = state.version, "restored index");
        Ok(())
    }

    /// Persist a snapshot to a JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = self.snapshot().await;
        let json = serde_json::to_vec(&snapshot)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Load a snapshot from a JSON file written by [`save`](Self::save).
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let snapshot: IndexSnapshot = serde_json::from_slice(&bytes)?;
        self.restore(snapshot).await
    }

    /// Aggregate counters.
    pub async fn stats(&self) -> IndexStats {
        let state = self.state.read().await;
        let documents = state
            .entries
            .iter()
            .map(|e| e.fields.document_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        IndexStats { entries: state.entries.len(), documents, version: state.version }
    }
}

/// Remove one entry, fixing up the position map. Returns whether it existed.
fn remove_entry(state: &mut IndexState, chunk_id: &str) -> bool {
    let Some(pos) = state.positions.remove(chunk_id) else {
        return false;
    };
    state.entries.remove(pos);
    // Positions after the removed slot shift left by one.
    for entry in &state.entries[pos..] {
        if let Some(p) = state.positions.get_mut(&entry.chunk_id) {
            *p -= 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(doc: &str, category: Option<&str>) -> FilterFields {
        FilterFields {
            document_id: doc.into(),
            category: category.map(Into::into),
            specialty: None,
            source: "test".into(),
        }
    }

    #[tokio::test]
    async fn insert_bumps_version_and_rejects_wrong_dimension() {
        let index = VectorIndex::new(3);
        assert_eq!(index.version().await, 0);

        index.insert("a_0", vec![1.0, 0.0, 0.0], fields("a", None)).await.unwrap();
        assert_eq!(index.version().await, 1);

        let err = index.insert("a_1", vec![1.0, 0.0], fields("a", None)).await;
        assert!(matches!(err, Err(EngineError::DimensionMismatch { expected: 3, actual: 2 })));
        assert_eq!(index.version().await, 1);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn delete_absent_is_noop_without_version_bump() {
        let index = VectorIndex::new(2);
        index.insert("a_0", vec![1.0, 0.0], fields("a", None)).await.unwrap();
        assert!(!index.delete("missing").await);
        assert_eq!(index.version().await, 1);
        assert!(index.delete("a_0").await);
        assert_eq!(index.version().await, 2);
    }

    #[tokio::test]
    async fn search_empty_index_returns_empty_result() {
        let index = VectorIndex::new(2);
        let (version, hits) = index.search(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(version, 0);
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_rejects_zero_top_k() {
        let index = VectorIndex::new(2);
        assert!(matches!(
            index.search(&[1.0, 0.0], 0, None).await,
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn search_orders_by_descending_score_with_stable_ties() {
        let index = VectorIndex::new(2);
        // Two identical vectors (tie) inserted in a known order, one closer.
        index.insert("tie_first", vec![0.0, 1.0], fields("a", None)).await.unwrap();
        index.insert("closest", vec![1.0, 0.0], fields("a", None)).await.unwrap();
        index.insert("tie_second", vec![0.0, 1.0], fields("a", None)).await.unwrap();

        let (_, hits) = index.search(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["closest", "tie_first", "tie_second"]);
    }

    #[tokio::test]
    async fn top_k_larger_than_entry_count_returns_all() {
        let index = VectorIndex::new(2);
        index.insert("a_0", vec![1.0, 0.0], fields("a", None)).await.unwrap();
        index.insert("a_1", vec![0.0, 1.0], fields("a", None)).await.unwrap();
        let (_, hits) = index.search(&[1.0, 0.0], 100, None).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn filtered_search_only_scans_matching_entries() {
        let index = VectorIndex::new(2);
        index.insert("a_0", vec![1.0, 0.0], fields("a", Some("cardiology"))).await.unwrap();
        index.insert("b_0", vec![1.0, 0.0], fields("b", Some("oncology"))).await.unwrap();

        let filter = MetadataFilter { category: Some("oncology".into()), ..Default::default() };
        let (_, hits) = index.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "b_0");
    }

    #[tokio::test]
    async fn delete_document_cascades_with_single_version_bump() {
        let index = VectorIndex::new(2);
        index.insert("a_0", vec![1.0, 0.0], fields("a", None)).await.unwrap();
        index.insert("a_1", vec![0.0, 1.0], fields("a", None)).await.unwrap();
        index.insert("b_0", vec![1.0, 1.0], fields("b", None)).await.unwrap();
        let before = index.version().await;

        assert_eq!(index.delete_document("a").await, 2);
        assert_eq!(index.version().await, before + 1);
        assert_eq!(index.len().await, 1);
        assert_eq!(index.delete_document("a").await, 0);
        assert_eq!(index.version().await, before + 1);
    }

    #[tokio::test]
    async fn snapshot_round_trips_entries_and_version() {
        let index = VectorIndex::new(2);
        index.insert("a_0", vec![1.0, 0.0], fields("a", Some("cardiology"))).await.unwrap();
        index.insert("b_0", vec![0.0, 1.0], fields("b", None)).await.unwrap();
        index.delete("b_0").await;

        let snapshot = index.snapshot().await;
        let restored = VectorIndex::new(2);
        restored.restore(snapshot).await.unwrap();

        assert_eq!(restored.version().await, 3);
        assert_eq!(restored.len().await, 1);
        let (_, hits) = restored.search(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(hits[0].chunk_id, "a_0");
    }

    #[tokio::test]
    async fn restore_rejects_mismatched_dimension() {
        let index = VectorIndex::new(2);
        let snapshot = IndexSnapshot { dimension: 4, version: 7, entries: Vec::new() };
        assert!(matches!(
            index.restore(snapshot).await,
            Err(EngineError::DimensionMismatch { expected: 2, actual: 4 })
        ));
    }

    #[test]
    fn cosine_similarity_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }
}
