//! Document chunking.
//!
//! Splits documents into overlapping character windows. Boundaries are
//! deterministic: identical input and parameters always produce identical
//! spans, which makes re-ingestion idempotent.

use crate::document::{Chunk, Document};
use crate::error::{EngineError, Result};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and spans but no embeddings;
/// embeddings are attached later by the engine.
pub trait Chunker: Send + Sync {
    /// Split a document into ordered chunks.
    ///
    /// Returns an empty `Vec` if the document text is empty.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Splits text into fixed-size character windows with configurable overlap.
///
/// Window and overlap are counted in characters, not bytes, so multi-byte
/// text never produces invalid slice boundaries. The final chunk may be
/// shorter than the window; a chunk ending exactly at the end of the text
/// terminates the sequence.
///
/// Chunk ids are `{document_id}_{ordinal}`.
#[derive(Debug, Clone)]
pub struct SlidingWindowChunker {
    window: usize,
    overlap: usize,
}

impl SlidingWindowChunker {
    /// Create a chunker with the given window and overlap (in characters).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] if `window` is zero or
    /// `overlap >= window`.
    pub fn new(window: usize, overlap: usize) -> Result<Self> {
        if window == 0 {
            return Err(EngineError::Config("chunk window must be positive".into()));
        }
        if overlap >= window {
            return Err(EngineError::Config(format!(
                "chunk overlap ({overlap}) must be less than window ({window})"
            )));
        }
        Ok(Self { window, overlap })
    }

    /// Lazily iterate over the chunks of a document.
    ///
    /// The iterator is restartable: calling this again yields the same
    /// sequence.
    pub fn iter<'a>(&self, document: &'a Document) -> ChunkIter<'a> {
        // Byte offset of every char boundary, plus the end of the text.
        let mut boundaries: Vec<usize> =
            document.text.char_indices().map(|(offset, _)| offset).collect();
        boundaries.push(document.text.len());

        ChunkIter {
            document,
            boundaries,
            window: self.window,
            step: self.window - self.overlap,
            start: 0,
            ordinal: 0,
            done: document.text.is_empty(),
        }
    }
}

impl Chunker for SlidingWindowChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        self.iter(document).collect()
    }
}

/// Lazy iterator over a document's chunks. Created by
/// [`SlidingWindowChunker::iter`].
pub struct ChunkIter<'a> {
    document: &'a Document,
    /// Byte offsets of char boundaries; `boundaries[i]` is the byte offset
    /// of character `i`, and the last element is `text.len()`.
    boundaries: Vec<usize>,
    window: usize,
    step: usize,
    /// Current window start, in characters.
    start: usize,
    ordinal: usize,
    done: bool,
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let total_chars = self.boundaries.len() - 1;
        let end = (self.start + self.window).min(total_chars);
        let byte_start = self.boundaries[self.start];
        let byte_end = self.boundaries[end];

        let chunk = Chunk {
            id: format!("{}_{}", self.document.id, self.ordinal),
            document_id: self.document.id.clone(),
            ordinal: self.ordinal,
            span: (self.start, end),
            text: self.document.text[byte_start..byte_end].to_string(),
        };

        if end == total_chars {
            self.done = true;
        } else {
            self.start += self.step;
            self.ordinal += 1;
        }

        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentMetadata;

    fn doc(text: &str) -> Document {
        Document {
            id: "doc".into(),
            text: text.into(),
            metadata: DocumentMetadata::new("t", "s"),
        }
    }

    #[test]
    fn rejects_overlap_not_smaller_than_window() {
        assert!(SlidingWindowChunker::new(100, 100).is_err());
        assert!(SlidingWindowChunker::new(0, 0).is_err());
        assert!(SlidingWindowChunker::new(100, 50).is_ok());
    }

    #[test]
    fn overlapping_windows_cover_1200_chars() {
        let chunker = SlidingWindowChunker::new(500, 50).unwrap();
        let chunks = chunker.chunk(&doc(&"a".repeat(1200)));
        let spans: Vec<_> = chunks.iter().map(|c| c.span).collect();
        assert_eq!(spans, vec![(0, 500), (450, 950), (900, 1200)]);
        assert_eq!(chunks[0].id, "doc_0");
        assert_eq!(chunks[2].ordinal, 2);
    }

    #[test]
    fn text_shorter_than_window_yields_one_chunk() {
        let chunker = SlidingWindowChunker::new(500, 50).unwrap();
        let chunks = chunker.chunk(&doc("short"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].span, (0, 5));
        assert_eq!(chunks[0].text, "short");
    }

    #[test]
    fn exact_window_length_yields_one_chunk() {
        let chunker = SlidingWindowChunker::new(500, 50).unwrap();
        let chunks = chunker.chunk(&doc(&"x".repeat(500)));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].span, (0, 500));
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let chunker = SlidingWindowChunker::new(500, 50).unwrap();
        assert!(chunker.chunk(&doc("")).is_empty());
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let chunker = SlidingWindowChunker::new(4, 1).unwrap();
        let chunks = chunker.chunk(&doc("β-blocker μg/kg"));
        let rejoined: String = chunks[0].text.chars().collect();
        assert_eq!(rejoined, "β-bl");
        for chunk in &chunks {
            assert_eq!(chunk.text.chars().count(), chunk.span.1 - chunk.span.0);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let chunker = SlidingWindowChunker::new(100, 20).unwrap();
        let d = doc(&"the patient presented with acute symptoms. ".repeat(30));
        let a = chunker.chunk(&d);
        let b = chunker.chunk(&d);
        assert_eq!(a, b);
    }

    #[test]
    fn iterator_is_restartable() {
        let chunker = SlidingWindowChunker::new(10, 2).unwrap();
        let d = doc(&"y".repeat(35));
        let first: Vec<_> = chunker.iter(&d).collect();
        let second: Vec<_> = chunker.iter(&d).collect();
        assert_eq!(first, second);
    }
}
