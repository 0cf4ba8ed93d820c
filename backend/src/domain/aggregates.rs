/// Domain aggregates
use super::base::{DomainError, DomainResult};
use super::entities::{EntryMetadata, IndexEntry};
use super::value_objects::{ChunkId, ContentHash, Institution, ModelIdentity, SimilarityMetric};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Describes an index: which model produced its vectors, their dimension, and how many there are
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub model: ModelIdentity,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    pub entry_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Metadata predicates applied before ranking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub institutions: Vec<Institution>,
    pub categories: Vec<String>,
    pub published_from: Option<NaiveDate>,
    pub published_to: Option<NaiveDate>,
    pub document: Option<ContentHash>,
}

impl SearchFilter {
    /// A filter that matches every entry
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_institution(mut self, institution: Institution) -> Self {
        self.institutions.push(institution);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn with_published_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.published_from = from;
        self.published_to = to;
        self
    }

    pub fn with_document(mut self, document: ContentHash) -> Self {
        self.document = Some(document);
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self == &Self::default()
    }

    /// Date bounds compare against the publish date, or the fetch date when none is known
    pub fn matches(&self, metadata: &EntryMetadata) -> bool {
        if !self.institutions.is_empty() && !self.institutions.contains(&metadata.institution) {
            return false;
        }

        if !self.categories.is_empty() {
            let Some(category) = metadata.category.as_deref() else {
                return false;
            };
            if !self.categories.iter().any(|c| c.eq_ignore_ascii_case(category)) {
                return false;
            }
        }

        if let Some(ref document) = self.document {
            if &metadata.document_hash != document {
                return false;
            }
        }

        if self.published_from.is_some() || self.published_to.is_some() {
            let date = metadata
                .published_at
                .unwrap_or_else(|| metadata.fetched_at.date_naive());
            if self.published_from.is_some_and(|from| date < from) {
                return false;
            }
            if self.published_to.is_some_and(|to| date > to) {
                return false;
            }
        }

        true
    }
}

/// A search hit borrowed from the index
#[derive(Debug, Clone, Copy)]
pub struct ScoredEntry<'a> {
    pub entry: &'a IndexEntry,
    pub score: f32,
    /// Insertion position inside the index, used as the tie-breaker
    pub position: usize,
}

/// Outcome of an incremental append
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub added: usize,
    pub skipped_duplicates: usize,
}

/// Exact nearest-neighbour index over embedded chunks.
///
/// The model identity, dimension and metric are fixed at creation; every
/// entry must agree with them. Entries are never reordered, so insertion
/// position is a stable tie-breaker for equal scores.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: ModelIdentity,
    metric: SimilarityMetric,
    dimension: usize,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
    norms: Vec<f32>,
    positions: HashMap<ChunkId, usize>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dimension`
    pub fn empty(model: ModelIdentity, metric: SimilarityMetric, dimension: usize) -> DomainResult<Self> {
        if dimension == 0 {
            return Err(DomainError::InvalidValue(
                "Index dimension must be positive".to_string(),
            ));
        }
        Ok(VectorIndex {
            model,
            metric,
            dimension,
            created_at: Utc::now(),
            entries: Vec::new(),
            norms: Vec::new(),
            positions: HashMap::new(),
        })
    }

    /// Build a new index from scratch. The first entry fixes the dimension.
    pub fn build(
        model: ModelIdentity,
        metric: SimilarityMetric,
        entries: Vec<IndexEntry>,
    ) -> DomainResult<Self> {
        let dimension = entries
            .first()
            .map(|e| e.record.vector.dimension_count())
            .ok_or_else(|| {
                DomainError::InvalidValue("Cannot build an index from zero entries".to_string())
            })?;

        let mut index = Self::empty(model, metric, dimension)?;
        index.add(entries)?;
        Ok(index)
    }

    /// Reassemble a persisted index, checking it against its manifest
    pub fn restore(manifest: IndexManifest, entries: Vec<IndexEntry>) -> DomainResult<Self> {
        if manifest.entry_count != entries.len() {
            return Err(DomainError::IndexCorrupt(format!(
                "manifest declares {} entries but {} were stored",
                manifest.entry_count,
                entries.len()
            )));
        }

        let mut index = Self::empty(manifest.model, manifest.metric, manifest.dimension)
            .map_err(|e| DomainError::IndexCorrupt(e.to_string()))?;
        index.created_at = manifest.created_at;

        for entry in &entries {
            if entry.record.vector.dimension_count() != index.dimension {
                return Err(DomainError::IndexCorrupt(format!(
                    "entry {} has {} dimensions, manifest declares {}",
                    entry.chunk_id(),
                    entry.record.vector.dimension_count(),
                    index.dimension
                )));
            }
        }

        let outcome = index.add(entries).map_err(|e| DomainError::IndexCorrupt(e.to_string()))?;
        if outcome.skipped_duplicates > 0 {
            return Err(DomainError::IndexCorrupt(format!(
                "{} duplicate chunk ids in stored entries",
                outcome.skipped_duplicates
            )));
        }

        Ok(index)
    }

    /// Append entries. Validation happens before any mutation, so a failed
    /// call leaves the index unchanged. Chunk ids already present are skipped.
    pub fn add(&mut self, entries: Vec<IndexEntry>) -> DomainResult<AddOutcome> {
        for entry in &entries {
            let found = entry.record.vector.dimension_count();
            if found != self.dimension {
                return Err(DomainError::DimensionMismatch {
                    expected: self.dimension,
                    found,
                });
            }
            self.model.ensure_matches(&entry.record.model)?;
        }

        let mut outcome = AddOutcome::default();
        for entry in entries {
            if self.positions.contains_key(entry.chunk_id()) {
                outcome.skipped_duplicates += 1;
                continue;
            }
            let position = self.entries.len();
            self.positions.insert(entry.chunk_id().clone(), position);
            self.norms.push(entry.record.vector.norm());
            self.entries.push(entry);
            outcome.added += 1;
        }

        Ok(outcome)
    }

    /// Return the `k` most similar entries that pass `filter`.
    ///
    /// Scores are sorted descending; equal scores keep insertion order.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> DomainResult<Vec<ScoredEntry<'_>>> {
        if query.len() != self.dimension {
            return Err(DomainError::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_norm = query.iter().map(|v| v * v).sum::<f32>().sqrt();
        let mut hits: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| filter.matches(&entry.metadata))
            .map(|(position, entry)| {
                let score = self.metric.score(
                    query,
                    query_norm,
                    entry.record.vector.dimensions(),
                    self.norms[position],
                );
                (position, score)
            })
            .collect();

        let ranking = |a: &(usize, f32), b: &(usize, f32)| -> Ordering {
            b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
        };

        if hits.len() > k {
            hits.select_nth_unstable_by(k - 1, ranking);
            hits.truncate(k);
        }
        hits.sort_by(ranking);

        Ok(hits
            .into_iter()
            .map(|(position, score)| ScoredEntry {
                entry: &self.entries[position],
                score,
                position,
            })
            .collect())
    }

    pub fn manifest(&self) -> IndexManifest {
        IndexManifest {
            model: self.model.clone(),
            dimension: self.dimension,
            metric: self.metric,
            entry_count: self.entries.len(),
            created_at: self.created_at,
        }
    }

    pub fn model(&self) -> &ModelIdentity {
        &self.model
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, chunk_id: &ChunkId) -> bool {
        self.positions.contains_key(chunk_id)
    }

    pub fn get(&self, chunk_id: &ChunkId) -> Option<&IndexEntry> {
        self.positions.get(chunk_id).map(|&p| &self.entries[p])
    }

    /// Entries in insertion order
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Hashes of every document that contributed at least one entry
    pub fn document_hashes(&self) -> HashSet<ContentHash> {
        self.entries
            .iter()
            .map(|e| e.metadata.document_hash.clone())
            .collect()
    }
}
