/// Exact and near-duplicate detection for documents and chunks
use crate::application::dto::DiscardReason;
use crate::config::DedupConfig;
use crate::domain::aggregates::VectorIndex;
use crate::domain::base::Entity;
use crate::domain::entities::{Chunk, Document};
use crate::domain::value_objects::{collapse_whitespace, ChunkId, ContentHash};
use crate::infrastructure::text::{MinHasher, Signature};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// Submission order of an item: (position in the batch, position within its source).
/// Lower ordinals win ties.
pub type Ordinal = (usize, usize);

/// A previously kept item that lost the tie-break to a newcomer
#[derive(Debug, Clone, PartialEq)]
pub struct Evicted<K> {
    pub key: K,
    pub ordinal: Ordinal,
    pub reason: DiscardReason,
}

/// Result of offering one item to a [`Deduplicator`]
#[derive(Debug, Clone, PartialEq)]
pub enum DedupOutcome<K> {
    Kept,
    /// Kept, and these previously kept items lost the tie-break to it
    KeptReplacing { evicted: Vec<Evicted<K>> },
    ExactDuplicate { of: K },
    NearDuplicate { of: K, similarity: f32 },
}

impl<K> DedupOutcome<K> {
    pub fn is_kept(&self) -> bool {
        matches!(self, DedupOutcome::Kept | DedupOutcome::KeptReplacing { .. })
    }
}

#[derive(Debug)]
struct Record<K> {
    key: K,
    hash: ContentHash,
    signature: Option<Signature>,
    canonical_len: usize,
    ordinal: Ordinal,
    /// Items already in the index; they always win
    pinned: bool,
    alive: bool,
}

impl<K> Record<K> {
    /// Longer text wins; equal lengths go to the earlier ordinal
    fn beats(&self, canonical_len: usize, ordinal: Ordinal) -> bool {
        self.pinned || (self.canonical_len, std::cmp::Reverse(self.ordinal)) >= (canonical_len, std::cmp::Reverse(ordinal))
    }
}

/// Keeps one representative per group of exact or near-identical texts.
///
/// The outcome for a pair of duplicates does not depend on the order in which
/// they are offered: the longer text (or, on a tie, the lower ordinal) is kept,
/// evicting an earlier winner if necessary.
#[derive(Debug)]
pub struct Deduplicator<K> {
    hasher: Arc<MinHasher>,
    config: DedupConfig,
    records: Vec<Record<K>>,
    by_hash: HashMap<ContentHash, usize>,
    by_key: HashMap<K, usize>,
    buckets: HashMap<u64, Vec<usize>>,
}

impl<K> Deduplicator<K>
where
    K: Clone + Eq + Hash + Debug,
{
    pub fn new(hasher: Arc<MinHasher>, config: DedupConfig) -> Self {
        Deduplicator {
            hasher,
            config,
            records: Vec::new(),
            by_hash: HashMap::new(),
            by_key: HashMap::new(),
            buckets: HashMap::new(),
        }
    }

    /// Register an already-indexed item with its text, enabling near matches against it
    pub fn seed_text(&mut self, key: K, text: &str) {
        let signature = self.signature(text);
        self.insert(key, ContentHash::of_text(text), signature, usize::MAX, (0, 0), true);
    }

    pub fn offer(&mut self, key: K, text: &str, ordinal: Ordinal) -> DedupOutcome<K> {
        let hash = ContentHash::of_text(text);
        let canonical_len = collapse_whitespace(text).chars().count();

        if let Some(&idx) = self.by_hash.get(&hash) {
            let existing = &self.records[idx];
            if existing.beats(canonical_len, ordinal) {
                return DedupOutcome::ExactDuplicate {
                    of: existing.key.clone(),
                };
            }
            let evicted = vec![self.evict(idx, DiscardReason::Exact)];
            let signature = self.signature(text);
            self.insert(key, hash, signature, canonical_len, ordinal, false);
            return DedupOutcome::KeptReplacing { evicted };
        }

        let signature = self.signature(text);
        let mut near: Vec<(usize, f32)> = Vec::new();
        if let Some(ref sig) = signature {
            let mut seen = Vec::new();
            for band_key in self.hasher.band_keys(sig) {
                let Some(candidates) = self.buckets.get(&band_key) else {
                    continue;
                };
                for &idx in candidates {
                    if seen.contains(&idx) || !self.records[idx].alive {
                        continue;
                    }
                    seen.push(idx);
                    if let Some(ref other) = self.records[idx].signature {
                        let similarity = sig.similarity(other);
                        if similarity >= self.config.threshold {
                            near.push((idx, similarity));
                        }
                    }
                }
            }
        }

        // The strongest matching record decides whether the newcomer survives
        let strongest = near
            .iter()
            .copied()
            .filter(|(idx, _)| self.records[*idx].beats(canonical_len, ordinal))
            .max_by(|(a, sa), (b, sb)| {
                let (ra, rb) = (&self.records[*a], &self.records[*b]);
                (ra.pinned, ra.canonical_len, std::cmp::Reverse(ra.ordinal))
                    .cmp(&(rb.pinned, rb.canonical_len, std::cmp::Reverse(rb.ordinal)))
                    .then(sa.total_cmp(sb))
            });

        if let Some((idx, similarity)) = strongest {
            return DedupOutcome::NearDuplicate {
                of: self.records[idx].key.clone(),
                similarity,
            };
        }

        let evicted: Vec<Evicted<K>> = near
            .into_iter()
            .map(|(idx, similarity)| self.evict(idx, DiscardReason::Near { similarity }))
            .collect();
        self.insert(key, hash, signature, canonical_len, ordinal, false);

        if evicted.is_empty() {
            DedupOutcome::Kept
        } else {
            DedupOutcome::KeptReplacing { evicted }
        }
    }

    pub fn is_kept(&self, key: &K) -> bool {
        self.by_key
            .get(key)
            .is_some_and(|&idx| self.records[idx].alive)
    }

    /// Ordinal of the live item registered under `key`
    pub fn kept_ordinal(&self, key: &K) -> Option<Ordinal> {
        self.by_key
            .get(key)
            .map(|&idx| &self.records[idx])
            .filter(|r| r.alive && !r.pinned)
            .map(|r| r.ordinal)
    }

    /// Number of live, non-seeded items
    pub fn kept_count(&self) -> usize {
        self.records.iter().filter(|r| r.alive && !r.pinned).count()
    }

    fn signature(&self, text: &str) -> Option<Signature> {
        self.config
            .near_duplicates
            .then(|| self.hasher.signature(text))
    }

    fn insert(
        &mut self,
        key: K,
        hash: ContentHash,
        signature: Option<Signature>,
        canonical_len: usize,
        ordinal: Ordinal,
        pinned: bool,
    ) {
        let idx = self.records.len();
        if let Some(ref sig) = signature {
            for band_key in self.hasher.band_keys(sig) {
                self.buckets.entry(band_key).or_default().push(idx);
            }
        }
        self.by_hash.insert(hash.clone(), idx);
        self.by_key.insert(key.clone(), idx);
        self.records.push(Record {
            key,
            hash,
            signature,
            canonical_len,
            ordinal,
            pinned,
            alive: true,
        });
    }

    fn evict(&mut self, idx: usize, reason: DiscardReason) -> Evicted<K> {
        let record = &mut self.records[idx];
        record.alive = false;
        if self.by_hash.get(&record.hash) == Some(&idx) {
            self.by_hash.remove(&record.hash);
        }
        Evicted {
            key: record.key.clone(),
            ordinal: record.ordinal,
            reason,
        }
    }
}

/// Build-scoped deduplication state shared by all workers.
///
/// Both levels sit behind a single lock so document and chunk decisions are
/// serialized. The session is dropped when the build ends.
#[derive(Debug)]
pub struct DedupSession {
    inner: Mutex<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    documents: Deduplicator<ContentHash>,
    chunks: Deduplicator<ChunkId>,
}

impl DedupSession {
    pub fn new(config: DedupConfig) -> Self {
        let hasher = Arc::new(MinHasher::new(&config));
        DedupSession {
            inner: Mutex::new(SessionState {
                documents: Deduplicator::new(Arc::clone(&hasher), config),
                chunks: Deduplicator::new(hasher, config),
            }),
        }
    }

    /// Session for an incremental build: chunks already indexed are pinned,
    /// so new chunks resembling them are discarded
    pub fn seeded_from(config: DedupConfig, index: &VectorIndex) -> Self {
        let session = Self::new(config);
        {
            let mut state = session.lock();
            for entry in index.entries() {
                state
                    .chunks
                    .seed_text(entry.chunk_id().clone(), &entry.metadata.text);
            }
        }
        session
    }

    pub fn offer_document(&self, document: &Document, ordinal: Ordinal) -> DedupOutcome<ContentHash> {
        self.lock()
            .documents
            .offer(document.content_hash().clone(), document.text(), ordinal)
    }

    pub fn offer_chunk(&self, chunk: &Chunk, ordinal: Ordinal) -> DedupOutcome<ChunkId> {
        self.lock()
            .chunks
            .offer(chunk.id().clone(), chunk.text(), ordinal)
    }

    /// Whether the document offered at `ordinal` is the surviving copy.
    /// Exact copies share a hash, so the ordinal tells them apart.
    pub fn document_kept(&self, hash: &ContentHash, ordinal: Ordinal) -> bool {
        self.lock().documents.kept_ordinal(hash) == Some(ordinal)
    }

    pub fn chunk_kept(&self, id: &ChunkId) -> bool {
        self.lock().chunks.is_kept(id)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // Every mutation completes before the guard drops, so a poisoned
        // lock still holds consistent state
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "The Central Bank of Kenya Monetary Policy Committee met on Tuesday and \
        decided to lower the Central Bank Rate by fifty basis points to support economic \
        activity while inflation remains anchored within the government target range of \
        five percent plus or minus two and a half percent over the coming months.";

    fn dedup(config: DedupConfig) -> Deduplicator<String> {
        Deduplicator::new(Arc::new(MinHasher::new(&config)), config)
    }

    #[test]
    fn test_exact_duplicate_ignores_whitespace_layout() {
        let mut d = dedup(DedupConfig::default());
        assert_eq!(d.offer("a".into(), BASE, (0, 0)), DedupOutcome::Kept);

        let reflowed = BASE.replace(' ', "\n ");
        assert_eq!(
            d.offer("b".into(), &reflowed, (1, 0)),
            DedupOutcome::ExactDuplicate { of: "a".into() }
        );
        assert_eq!(d.kept_count(), 1);
    }

    #[test]
    fn test_exact_duplicate_tie_break_is_order_independent() {
        let mut d = dedup(DedupConfig::default());
        // Ordinal 5 arrives first, ordinal 2 later: the earlier ordinal must win
        assert_eq!(d.offer("late".into(), BASE, (5, 0)), DedupOutcome::Kept);
        assert_eq!(
            d.offer("early".into(), BASE, (2, 0)),
            DedupOutcome::KeptReplacing {
                evicted: vec![Evicted {
                    key: "late".into(),
                    ordinal: (5, 0),
                    reason: DiscardReason::Exact,
                }]
            }
        );
        assert!(d.is_kept(&"early".to_string()));
        assert!(!d.is_kept(&"late".to_string()));
    }

    #[test]
    fn test_near_duplicate_keeps_longer_text() {
        let mut d = dedup(DedupConfig::default());
        let shorter = BASE.to_uppercase();
        let longer = format!("{} Thank you.", BASE);

        assert_eq!(d.offer("upper".into(), &shorter, (0, 0)), DedupOutcome::Kept);
        match d.offer("longer".into(), &longer, (1, 0)) {
            DedupOutcome::KeptReplacing { evicted } => {
                assert_eq!(evicted.len(), 1);
                assert_eq!(evicted[0].key, "upper");
                assert_eq!(evicted[0].ordinal, (0, 0));
                assert!(matches!(evicted[0].reason, DiscardReason::Near { similarity } if similarity >= 0.85));
            }
            other => panic!("expected replacement, got {:?}", other),
        }

        // Offering the shorter one again now loses
        assert!(matches!(
            d.offer("upper-again".into(), &BASE.to_lowercase(), (2, 0)),
            DedupOutcome::NearDuplicate { ref of, .. } if of == "longer"
        ));
    }

    #[test]
    fn test_near_duplicates_disabled() {
        let mut d = dedup(DedupConfig {
            near_duplicates: false,
            ..Default::default()
        });
        assert!(d.offer("a".into(), BASE, (0, 0)).is_kept());
        assert!(d.offer("b".into(), &BASE.to_uppercase(), (1, 0)).is_kept());
        assert_eq!(d.kept_count(), 2);
    }

    #[test]
    fn test_unrelated_texts_are_both_kept() {
        let mut d = dedup(DedupConfig::default());
        assert!(d.offer("a".into(), BASE, (0, 0)).is_kept());
        let other = "Safaricom shareholders approved a final dividend of 1.20 shillings per \
            share at the annual general meeting held virtually, with the books closure date \
            set for the end of the month and payment expected shortly after.";
        assert_eq!(d.offer("b".into(), other, (1, 0)), DedupOutcome::Kept);
    }

    #[test]
    fn test_partial_overlap_is_not_flagged() {
        let mut d = dedup(DedupConfig::default());
        let follow_up = "The Central Bank of Kenya Monetary Policy Committee met on Tuesday and \
            decided to lower the Central Bank Rate by fifty basis points to support economic \
            activity. The Committee will meet again in April to review the impact of the \
            decision on private sector lending.";

        assert_eq!(d.offer("decision".into(), BASE, (0, 0)), DedupOutcome::Kept);
        assert_eq!(d.offer("follow-up".into(), follow_up, (1, 0)), DedupOutcome::Kept);
        assert_eq!(d.kept_count(), 2);
    }

    #[test]
    fn test_pinned_seed_always_wins() {
        let mut d = dedup(DedupConfig::default());
        d.seed_text("indexed".into(), BASE);
        assert_eq!(
            d.offer("fresh".into(), BASE, (0, 0)),
            DedupOutcome::ExactDuplicate {
                of: "indexed".into()
            }
        );
        assert_eq!(d.kept_count(), 0);
    }

    #[test]
    fn test_offering_twice_is_idempotent() {
        let mut d = dedup(DedupConfig::default());
        assert!(d.offer("a".into(), BASE, (0, 0)).is_kept());
        assert_eq!(
            d.offer("a".into(), BASE, (0, 0)),
            DedupOutcome::ExactDuplicate { of: "a".into() }
        );
        assert_eq!(d.kept_count(), 1);
    }

    fn document(text: &str) -> Document {
        use crate::domain::entities::{DocumentFormat, SourceMetadata};
        use crate::domain::value_objects::{Institution, SourceUrl};
        let metadata = SourceMetadata::new(
            SourceUrl::new("https://www.centralbank.go.ke/mpc").unwrap(),
            Institution::new("cbk").unwrap(),
            chrono::Utc::now(),
        );
        Document::new(&metadata, "MPC".to_string(), DocumentFormat::Text, 1, text.to_string(), None)
    }

    #[test]
    fn test_session_picks_one_exact_copy_by_ordinal() {
        let session = DedupSession::new(DedupConfig::default());
        let first = document(BASE);
        let second = document(BASE);

        // The later submission is offered first, as a racing worker might
        assert!(session.offer_document(&second, (1, 0)).is_kept());
        assert!(session.offer_document(&first, (0, 0)).is_kept());

        assert!(session.document_kept(first.content_hash(), (0, 0)));
        assert!(!session.document_kept(second.content_hash(), (1, 0)));
    }

    #[test]
    fn test_seeded_session_discards_indexed_chunk_text() {
        use crate::domain::entities::{EmbeddingRecord, IndexEntry};
        use crate::domain::value_objects::{EmbeddingVector, ModelIdentity, SimilarityMetric};

        let doc = document(BASE);
        let chunk = Chunk::new(doc.content_hash(), 0, BASE, 0, BASE.chars().count(), 0);
        let model = ModelIdentity::new("hashing", "1").unwrap();
        let record = EmbeddingRecord {
            chunk_id: chunk.id().clone(),
            vector: EmbeddingVector::new(vec![1.0, 0.0]).unwrap(),
            model: model.clone(),
        };
        let index = VectorIndex::build(
            model,
            SimilarityMetric::Cosine,
            vec![IndexEntry::from_parts(&chunk, &doc, record).unwrap()],
        )
        .unwrap();

        let session = DedupSession::seeded_from(DedupConfig::default(), &index);
        let other_hash = ContentHash::of_text("another document");
        let copy = Chunk::new(&other_hash, 0, format!("{} Thank you.", BASE), 0, 10, 0);
        assert!(matches!(
            session.offer_chunk(&copy, (0, 0)),
            DedupOutcome::NearDuplicate { ref of, .. } if of == chunk.id()
        ));
        assert!(!session.chunk_kept(copy.id()));
    }
}
