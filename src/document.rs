//! Data types for documents, chunks, retrieval results, and citations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Typed metadata attached to every document at ingestion.
///
/// The schema is fixed: free-form payloads are rejected up front rather than
/// carried as untyped maps. [`validate`](DocumentMetadata::validate) runs
/// during ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    /// Human-readable document title.
    pub title: String,
    /// Where the document came from (journal, registry, internal corpus).
    pub source: String,
    /// Author, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Publication or import date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    /// Corpus category (e.g. `clinical-guidelines`, `drug-reference`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Medical specialty (e.g. `cardiology`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    /// Link back to the original source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Keywords for display; not used in filtering.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl DocumentMetadata {
    /// Create metadata with the two required fields.
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
            author: None,
            published: None,
            category: None,
            specialty: None,
            url: None,
            keywords: Vec::new(),
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the specialty.
    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialty = Some(specialty.into());
        self
    }

    /// Set the source URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Validate the fixed schema.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `title` or `source` is empty.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(EngineError::Config("document title must not be empty".into()));
        }
        if self.source.trim().is_empty() {
            return Err(EngineError::Config("document source must not be empty".into()));
        }
        Ok(())
    }
}

/// An immutable source document.
///
/// Updated only by re-ingesting under the same id, which replaces all of
/// its chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable document id, assigned at ingestion.
    pub id: String,
    /// The full source text.
    pub text: String,
    /// Typed document metadata.
    pub metadata: DocumentMetadata,
}

/// A contiguous slice of a document's text, the unit of embedding and
/// retrieval.
///
/// `span` is a half-open character range into the parent document's text.
/// Chunks are owned by their document and destroyed with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Chunk id, `{document_id}_{ordinal}`.
    pub id: String,
    /// The id of the parent document.
    pub document_id: String,
    /// Position of this chunk within its document, starting at 0.
    pub ordinal: usize,
    /// Half-open `[start, end)` character span in the parent text.
    pub span: (usize, usize),
    /// The chunk text.
    pub text: String,
}

/// Filter applied to index searches and metadata lookups.
///
/// All set fields must match (conjunction); an empty filter matches
/// everything. Matching is case-sensitive exact equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// Match documents of this category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Match documents of this specialty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    /// Match documents from this source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl MetadataFilter {
    /// A filter that matches documents of the given category.
    pub fn category(category: impl Into<String>) -> Self {
        Self { category: Some(category.into()), ..Self::default() }
    }

    /// Whether this filter constrains anything at all.
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.specialty.is_none() && self.source.is_none()
    }

    /// Whether the given document metadata satisfies this filter.
    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        if let Some(category) = &self.category {
            if metadata.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(specialty) = &self.specialty {
            if metadata.specialty.as_deref() != Some(specialty.as_str()) {
                return false;
            }
        }
        if let Some(source) = &self.source {
            if metadata.source != *source {
                return false;
            }
        }
        true
    }
}

/// A retrieved chunk paired with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity in `[-1, 1]` (higher is more relevant).
    pub score: f32,
}

/// The ordered output of a similarity search.
///
/// Hits are sorted by strictly non-increasing score, ties broken by index
/// insertion order. `index_version` records the index state the search
/// observed, used for cache staleness checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Hits in descending score order.
    pub hits: Vec<SearchHit>,
    /// The index version the search ran against.
    pub index_version: u64,
}

impl RetrievalResult {
    /// An empty result against the given index version.
    pub fn empty(index_version: u64) -> Self {
        Self { hits: Vec::new(), index_version }
    }

    /// Whether the search found no evidence.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A citation mapping a context chunk back to its source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// The cited chunk.
    pub chunk_id: String,
    /// The cited document.
    pub document_id: String,
    /// Document title.
    pub title: String,
    /// Document source.
    pub source: String,
    /// Link to the original, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
