//! Keyed chunk metadata store.
//!
//! Maps chunk ids to their text and denormalized document metadata. The
//! engine joins search hits against this store to rebuild full chunks and
//! assemble citations.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::document::{Chunk, Citation, DocumentMetadata, MetadataFilter};
use crate::error::{EngineError, Result};

/// A chunk plus the document metadata it was ingested with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// The chunk itself (text, ordinal, span).
    pub chunk: Chunk,
    /// Metadata of the parent document.
    pub metadata: DocumentMetadata,
}

impl ChunkRecord {
    /// Build the citation for this chunk.
    pub fn citation(&self) -> Citation {
        Citation {
            chunk_id: self.chunk.id.clone(),
            document_id: self.chunk.document_id.clone(),
            title: self.metadata.title.clone(),
            source: self.metadata.source.clone(),
            url: self.metadata.url.clone(),
        }
    }
}

/// Serializable snapshot of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    /// All records keyed by chunk id.
    pub records: HashMap<String, ChunkRecord>,
}

/// Keyed document/chunk metadata with filtered lookup.
#[derive(Debug, Default)]
pub struct MetadataStore {
    records: RwLock<HashMap<String, ChunkRecord>>,
}

impl MetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub async fn put(&self, record: ChunkRecord) {
        let mut records = self.records.write().await;
        records.insert(record.chunk.id.clone(), record);
    }

    /// Insert a batch of records under one write lock.
    pub async fn put_batch(&self, batch: Vec<ChunkRecord>) {
        let mut records = self.records.write().await;
        for record in batch {
            records.insert(record.chunk.id.clone(), record);
        }
    }

    /// Look up a record by chunk id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] on a miss.
    pub async fn get(&self, chunk_id: &str) -> Result<ChunkRecord> {
        let records = self.records.read().await;
        records
            .get(chunk_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("chunk '{chunk_id}'")))
    }

    /// Remove a record. Returns `true` if it existed.
    pub async fn remove(&self, chunk_id: &str) -> bool {
        self.records.write().await.remove(chunk_id).is_some()
    }

    /// Remove every record belonging to a document; returns the removed
    /// chunk ids.
    pub async fn remove_document(&self, document_id: &str) -> Vec<String> {
        let mut records = self.records.write().await;
        let ids: Vec<String> = records
            .values()
            .filter(|r| r.chunk.document_id == document_id)
            .map(|r| r.chunk.id.clone())
            .collect();
        for id in &ids {
            records.remove(id);
        }
        ids
    }

    /// Chunk ids whose document metadata satisfies the filter.
    pub async fn filter(&self, filter: &MetadataFilter) -> Vec<String> {
        let records = self.records.read().await;
        records
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| r.chunk.id.clone())
            .collect()
    }

    /// Distinct document ids present in the store.
    pub async fn document_ids(&self) -> Vec<String> {
        let records = self.records.read().await;
        let mut ids: Vec<String> = records
            .values()
            .map(|r| r.chunk.document_id.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        ids.sort();
        ids
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Capture the full record set.
    pub async fn snapshot(&self) -> MetadataSnapshot {
        MetadataSnapshot { records: self.records.read().await.clone() }
    }

    /// Replace the store contents from a snapshot.
    pub async fn restore(&self, snapshot: MetadataSnapshot) {
        *self.records.write().await = snapshot.records;
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
        let snapshot: MetadataSnapshot = serde_json::from_slice(&bytes)?;
        self.restore(snapshot).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(chunk_id: &str, doc_id: &str, category: Option<&str>) -> ChunkRecord {
        let mut metadata = DocumentMetadata::new("Title", "journal");
        metadata.category = category.map(Into::into);
        ChunkRecord {
            chunk: Chunk {
                id: chunk_id.into(),
                document_id: doc_id.into(),
                ordinal: 0,
                span: (0, 4),
                text: "text".into(),
            },
            metadata,
        }
    }

    #[tokio::test]
    async fn get_miss_is_not_found() {
        let store = MetadataStore::new();
        assert!(matches!(store.get("nope").await, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn filter_matches_on_category() {
        let store = MetadataStore::new();
        store.put(record("a_0", "a", Some("cardiology"))).await;
        store.put(record("b_0", "b", Some("oncology"))).await;
        store.put(record("c_0", "c", None)).await;

        let ids = store.filter(&MetadataFilter::category("cardiology")).await;
        assert_eq!(ids, vec!["a_0".to_string()]);

        let all = store.filter(&MetadataFilter::default()).await;
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn remove_document_cascades() {
        let store = MetadataStore::new();
        store.put(record("a_0", "a", None)).await;
        store.put(record("a_1", "a", None)).await;
        store.put(record("b_0", "b", None)).await;

        let mut removed = store.remove_document("a").await;
        removed.sort();
        assert_eq!(removed, vec!["a_0".to_string(), "a_1".to_string()]);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn citation_maps_back_to_document_metadata() {
        let record = record("a_0", "a", None);
        let citation = record.citation();
        assert_eq!(citation.chunk_id, "a_0");
        assert_eq!(citation.title, "Title");
        assert_eq!(citation.source, "journal");
    }
}
