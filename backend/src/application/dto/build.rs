use crate::domain::value_objects::{ChunkId, ContentHash, SourceUrl};
use std::time::Duration;

/// Why an item was dropped by deduplication
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiscardReason {
    Exact,
    Near { similarity: f32 },
}

/// A document or chunk removed as a duplicate. `chunk_id` is unset for
/// whole-document discards.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupDiscard {
    pub document: ContentHash,
    /// Where the dropped copy came from; exact copies share `document`
    pub source_url: SourceUrl,
    pub chunk_id: Option<ChunkId>,
    pub reason: DiscardReason,
    /// Key of the item that was kept instead
    pub duplicate_of: String,
}

/// A raw document that could not be loaded
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentFailure {
    pub source_url: SourceUrl,
    pub reason: String,
}

/// Chunks left out of the index because their embedding batch failed for good
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingGap {
    pub batch_index: usize,
    pub chunk_ids: Vec<ChunkId>,
    pub attempts: u32,
    pub reason: String,
}

/// Progress event for the build process
#[derive(Debug, Clone)]
pub enum BuildProgressEvent {
    Started { total_documents: usize },
    DocumentProcessed { source_url: SourceUrl, processed: usize, total: usize },
    EmbeddingStarted { chunks: usize, batches: usize },
    BatchEmbedded { batch_index: usize, chunks: usize },
    Persisted { entries: usize },
    Completed { chunks_indexed: usize, duration_ms: u64 },
}

/// Summary of an index build
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    pub documents_total: usize,
    pub documents_loaded: usize,
    /// Documents whose exact text is already in the index
    pub documents_already_indexed: usize,
    pub parse_failures: Vec<DocumentFailure>,
    pub discards: Vec<DedupDiscard>,
    pub chunks_indexed: usize,
    /// Chunks already present in the index before an update
    pub chunks_already_indexed: usize,
    pub embedding_gaps: Vec<EmbeddingGap>,
    pub duration: Duration,
}

impl BuildSummary {
    pub fn document_discards(&self) -> impl Iterator<Item = &DedupDiscard> {
        self.discards.iter().filter(|d| d.chunk_id.is_none())
    }

    pub fn chunk_discards(&self) -> impl Iterator<Item = &DedupDiscard> {
        self.discards.iter().filter(|d| d.chunk_id.is_some())
    }

    pub fn gap_chunk_count(&self) -> usize {
        self.embedding_gaps.iter().map(|g| g.chunk_ids.len()).sum()
    }

    pub fn success_rate(&self) -> f64 {
        if self.documents_total == 0 {
            return 100.0;
        }
        (self.documents_loaded as f64 / self.documents_total as f64) * 100.0
    }

    pub fn has_errors(&self) -> bool {
        !self.parse_failures.is_empty() || !self.embedding_gaps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_summary() {
        let hash = ContentHash::of_text("doc");
        let summary = BuildSummary {
            documents_total: 4,
            documents_loaded: 3,
            parse_failures: vec![DocumentFailure {
                source_url: SourceUrl::new("https://kra.go.ke/x.pdf").unwrap(),
                reason: "Document is encrypted".to_string(),
            }],
            discards: vec![
                DedupDiscard {
                    document: hash.clone(),
                    source_url: SourceUrl::new("https://mirror.example.com/x").unwrap(),
                    chunk_id: None,
                    reason: DiscardReason::Exact,
                    duplicate_of: "other".to_string(),
                },
                DedupDiscard {
                    document: hash.clone(),
                    source_url: SourceUrl::new("https://kra.go.ke/y").unwrap(),
                    chunk_id: Some(ChunkId::derive(&hash, 0)),
                    reason: DiscardReason::Near { similarity: 0.9 },
                    duplicate_of: "other".to_string(),
                },
            ],
            embedding_gaps: vec![EmbeddingGap {
                batch_index: 2,
                chunk_ids: vec![ChunkId::derive(&hash, 0), ChunkId::derive(&hash, 900)],
                attempts: 4,
                reason: "timeout".to_string(),
            }],
            ..Default::default()
        };

        assert_eq!(summary.success_rate(), 75.0);
        assert!(summary.has_errors());
        assert_eq!(summary.document_discards().count(), 1);
        assert_eq!(summary.chunk_discards().count(), 1);
        assert_eq!(summary.gap_chunk_count(), 2);
    }
}
