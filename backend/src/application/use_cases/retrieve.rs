use crate::application::capabilities::{EmbedError, Embedder};
use crate::application::dto::{GroundedContext, Passage, RetrievalRequest};
use crate::application::services::EmbeddingService;
use crate::config::{EmbeddingConfig, RerankStrategy, RetrievalConfig};
use crate::domain::aggregates::{ScoredEntry, VectorIndex};
use crate::domain::base::DomainError;
use crate::domain::entities::EntryMetadata;
use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrieveError {
    #[error("Retrieval timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("Question is empty")]
    EmptyQuestion,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type RetrieveResult<T> = Result<T, RetrieveError>;

/// Use case for finding grounding passages for a question
///
/// Works on a frozen index snapshot, so any number of retrievals can run
/// concurrently with each other and with a writer building the next index.
pub struct Retriever {
    index: Arc<VectorIndex>,
    embeddings: EmbeddingService,
    config: RetrievalConfig,
}

impl Retriever {
    /// Fails with `ModelMismatch` unless the embedder serves the model the index was built with
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        embedding_config: EmbeddingConfig,
        config: RetrievalConfig,
    ) -> RetrieveResult<Self> {
        index.model().ensure_matches(embedder.model())?;
        if embedder.dimension() != index.dimension() {
            return Err(DomainError::DimensionMismatch {
                expected: index.dimension(),
                found: embedder.dimension(),
            }
            .into());
        }

        Ok(Retriever {
            index,
            embeddings: EmbeddingService::new(embedder, embedding_config),
            config,
        })
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Retrieve the grounded context for `request`.
    ///
    /// The whole call is bounded by the query timeout; on expiry nothing
    /// partial is returned.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> RetrieveResult<GroundedContext> {
        let timeout = self.config.query_timeout();
        tokio::time::timeout(timeout, self.retrieve_within_deadline(request))
            .await
            .map_err(|_| RetrieveError::Timeout(timeout))?
    }

    async fn retrieve_within_deadline(
        &self,
        request: &RetrievalRequest,
    ) -> RetrieveResult<GroundedContext> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RetrieveError::EmptyQuestion);
        }

        let k = request.top_k.unwrap_or(self.config.top_k);
        let strategy = match request.rerank {
            Some(strategy) => {
                strategy
                    .validate()
                    .map_err(|e| RetrieveError::InvalidRequest(e.to_string()))?;
                strategy
            }
            None => self.config.rerank,
        };
        let candidates = if strategy.is_enabled() {
            self.config.rerank_candidates.max(k)
        } else {
            k
        };

        let query = self
            .embeddings
            .embed_query(question, self.index.model())
            .await?;
        let mut hits = self
            .index
            .search(query.dimensions(), candidates, &request.filter)?;

        if let Some(floor) = self.config.min_score {
            hits.retain(|hit| hit.score >= floor);
        }

        let as_of = request.as_of.unwrap_or_else(|| Utc::now().date_naive());
        let mut ranked = rerank(strategy, question, as_of, hits);
        ranked.truncate(k);

        let context = fit_budget(ranked, self.config.max_context_chars);
        info!(
            "Retrieved {} passages ({} chars, {} dropped for budget) for a {}-char question",
            context.passages.len(),
            context.total_chars,
            context.dropped_for_budget,
            question.chars().count()
        );
        Ok(context)
    }
}

fn passage(hit: &ScoredEntry<'_>, score: f32) -> Passage {
    let meta = &hit.entry.metadata;
    Passage {
        chunk_id: hit.entry.chunk_id().clone(),
        text: meta.text.clone(),
        source_title: meta.title.clone(),
        section_title: meta.section_title.clone(),
        source_url: meta.source_url.clone(),
        institution: meta.institution.clone(),
        published_at: meta.published_at,
        score,
        similarity: hit.score,
    }
}

/// Lowercased alphanumeric words
fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Recency signal in (0, 1]: halves every `half_life_days` of age
fn recency_signal(meta: &EntryMetadata, as_of: NaiveDate, half_life_days: f32) -> f32 {
    let date = meta
        .published_at
        .unwrap_or_else(|| meta.fetched_at.date_naive());
    let age_days = (as_of - date).num_days().max(0) as f32;
    0.5f32.powf(age_days / half_life_days)
}

/// Share of the question's words that appear in the passage
fn lexical_signal(question_words: &HashSet<String>, text: &str) -> f32 {
    if question_words.is_empty() {
        return 0.0;
    }
    let passage_words = words(text);
    let shared = question_words
        .iter()
        .filter(|w| passage_words.contains(*w))
        .count();
    shared as f32 / question_words.len() as f32
}

/// Mix a secondary signal into the similarity, `(1 - w) * similarity + w * signal`,
/// and reorder. Equal scores keep their similarity order.
fn rerank(
    strategy: RerankStrategy,
    question: &str,
    as_of: NaiveDate,
    hits: Vec<ScoredEntry<'_>>,
) -> Vec<Passage> {
    let weight = strategy.weight();
    let question_words = words(question);

    let mut passages: Vec<Passage> = hits
        .iter()
        .map(|hit| {
            let signal = match strategy {
                RerankStrategy::None => return passage(hit, hit.score),
                RerankStrategy::Recency { half_life_days, .. } => {
                    recency_signal(&hit.entry.metadata, as_of, half_life_days)
                }
                RerankStrategy::LexicalOverlap { .. } => {
                    lexical_signal(&question_words, &hit.entry.metadata.text)
                }
            };
            passage(hit, (1.0 - weight) * hit.score + weight * signal)
        })
        .collect();

    if strategy.is_enabled() {
        passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!("Re-ranked {} candidates with {:?}", passages.len(), strategy);
    }
    passages
}

/// Keep passages in rank order while they fit in `max_chars`.
/// Stops at the first passage that does not fit; passages are never cut.
fn fit_budget(ranked: Vec<Passage>, max_chars: usize) -> GroundedContext {
    let ranked_count = ranked.len();
    let mut context = GroundedContext::default();

    for passage in ranked {
        let len = passage.char_len();
        if context.total_chars + len > max_chars {
            break;
        }
        context.total_chars += len;
        context.passages.push(passage);
    }

    context.dropped_for_budget = ranked_count - context.passages.len();
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::SearchFilter;
    use crate::domain::entities::{EmbeddingRecord, IndexEntry};
    use crate::domain::value_objects::{
        ChunkId, ContentHash, EmbeddingVector, Institution, ModelIdentity, SimilarityMetric,
        SourceUrl,
    };
    use crate::infrastructure::embeddings::HashingEmbedder;
    use chrono::TimeZone;

    fn model() -> ModelIdentity {
        ModelIdentity::new("hashing", "1").unwrap()
    }

    fn embedder() -> HashingEmbedder {
        HashingEmbedder::new(model(), 128)
    }

    fn entry(name: &str, text: &str, published: Option<NaiveDate>) -> IndexEntry {
        let hash = ContentHash::of_text(name);
        IndexEntry {
            record: EmbeddingRecord {
                chunk_id: ChunkId::derive(&hash, 0),
                vector: EmbeddingVector::new(embedder().vector(text)).unwrap(),
                model: model(),
            },
            metadata: EntryMetadata {
                document_hash: hash,
                institution: Institution::new("cbk").unwrap(),
                category: None,
                title: name.to_string(),
                section_title: None,
                source_url: SourceUrl::new(format!("https://www.centralbank.go.ke/{}", name)).unwrap(),
                published_at: published,
                fetched_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
                text: text.to_string(),
                char_start: 0,
                char_end: text.chars().count(),
            },
        }
    }

    fn retriever(entries: Vec<IndexEntry>, config: RetrievalConfig) -> Retriever {
        let index = VectorIndex::build(model(), SimilarityMetric::Cosine, entries).unwrap();
        Retriever::new(
            Arc::new(index),
            Arc::new(embedder()),
            EmbeddingConfig::default(),
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_most_similar_passage_first() {
        let retriever = retriever(
            vec![
                entry("tbills", "Treasury bill auction results for the 91 day paper", None),
                entry("cbr", "The Central Bank Rate was lowered to 9.75 percent", None),
            ],
            RetrievalConfig::default(),
        );

        let context = retriever
            .retrieve(&RetrievalRequest::new("What is the Central Bank Rate?").with_top_k(1))
            .await
            .unwrap();

        assert_eq!(context.passages.len(), 1);
        assert_eq!(context.passages[0].source_title, "cbr");
        assert_eq!(context.passages[0].score, context.passages[0].similarity);
    }

    #[tokio::test]
    async fn test_empty_question() {
        let retriever = retriever(vec![entry("a", "text", None)], RetrievalConfig::default());
        let err = retriever.retrieve(&RetrievalRequest::new("   ")).await.unwrap_err();
        assert_eq!(err, RetrieveError::EmptyQuestion);
    }

    #[tokio::test]
    async fn test_per_request_rerank_is_validated() {
        let retriever = retriever(
            vec![entry("cbr", "The Central Bank Rate was lowered", None)],
            RetrievalConfig::default(),
        );

        let zero_half_life = RetrievalRequest::new("Central Bank Rate").with_rerank(
            RerankStrategy::Recency {
                weight: 0.5,
                half_life_days: 0.0,
            },
        );
        let err = retriever.retrieve(&zero_half_life).await.unwrap_err();
        assert!(matches!(err, RetrieveError::InvalidRequest(ref reason) if reason.contains("half_life_days")));

        let heavy = RetrievalRequest::new("Central Bank Rate")
            .with_rerank(RerankStrategy::LexicalOverlap { weight: 1.5 });
        assert!(matches!(
            retriever.retrieve(&heavy).await,
            Err(RetrieveError::InvalidRequest(_))
        ));

        let valid = RetrievalRequest::new("Central Bank Rate").with_rerank(
            RerankStrategy::Recency {
                weight: 0.5,
                half_life_days: 30.0,
            },
        );
        let context = retriever.retrieve(&valid).await.unwrap();
        assert!(context.passages.iter().all(|p| p.score.is_finite()));
    }

    #[tokio::test]
    async fn test_filter_restricts_results() {
        let mut nse = entry("nse", "Central bank rate commentary from the exchange", None);
        nse.metadata.institution = Institution::new("nse").unwrap();
        let retriever = retriever(
            vec![entry("cbr", "Central bank rate decision", None), nse],
            RetrievalConfig::default(),
        );

        let request = RetrievalRequest::new("central bank rate")
            .with_filter(SearchFilter::any().with_institution(Institution::new("nse").unwrap()));
        let context = retriever.retrieve(&request).await.unwrap();

        assert_eq!(context.passages.len(), 1);
        assert_eq!(context.passages[0].institution.as_str(), "nse");
    }

    #[tokio::test]
    async fn test_score_floor() {
        let retriever = retriever(
            vec![entry("maize", "Maize harvest improved in the Rift Valley", None)],
            RetrievalConfig {
                min_score: Some(0.5),
                ..Default::default()
            },
        );
        let context = retriever
            .retrieve(&RetrievalRequest::new("Treasury bond coupon"))
            .await
            .unwrap();
        assert!(context.is_empty());
    }

    #[test]
    fn test_recency_rerank_prefers_newer_source() {
        let as_of = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let old = entry("old", "rate", NaiveDate::from_ymd_opt(2024, 3, 1));
        let new = entry("new", "rate", NaiveDate::from_ymd_opt(2026, 2, 1));
        let hits = vec![
            ScoredEntry { entry: &old, score: 0.80, position: 0 },
            ScoredEntry { entry: &new, score: 0.75, position: 1 },
        ];

        let strategy = RerankStrategy::Recency {
            weight: 0.5,
            half_life_days: 180.0,
        };
        let ranked = rerank(strategy, "rate", as_of, hits);

        assert_eq!(ranked[0].source_title, "new");
        assert_eq!(ranked[1].similarity, 0.80);
        assert!(ranked[1].score < ranked[1].similarity);
    }

    #[test]
    fn test_recency_uses_fetch_date_without_publish_date() {
        let undated = entry("undated", "rate", None);
        let as_of = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(recency_signal(&undated.metadata, as_of, 30.0), 1.0);

        let later = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        assert!((recency_signal(&undated.metadata, later, 30.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_lexical_rerank() {
        let a = entry("a", "inflation outlook", None);
        let b = entry("b", "mobile money transfer tariffs", None);
        let hits = vec![
            ScoredEntry { entry: &a, score: 0.6, position: 0 },
            ScoredEntry { entry: &b, score: 0.55, position: 1 },
        ];

        let strategy = RerankStrategy::LexicalOverlap { weight: 0.4 };
        let ranked = rerank(strategy, "M-Pesa mobile money tariffs", as_of(), hits);
        assert_eq!(ranked[0].source_title, "b");
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn test_budget_keeps_whole_passages_in_rank_order() {
        let entries: Vec<IndexEntry> = (0..5)
            .map(|i| entry(&format!("p{}", i), &"x".repeat(1000), None))
            .collect();
        let hits: Vec<ScoredEntry<'_>> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| ScoredEntry {
                entry: e,
                score: 0.9 - i as f32 * 0.1,
                position: i,
            })
            .collect();

        let ranked = rerank(RerankStrategy::None, "q", as_of(), hits);
        let context = fit_budget(ranked, 2000);

        assert_eq!(context.passages.len(), 2);
        assert_eq!(context.total_chars, 2000);
        assert_eq!(context.dropped_for_budget, 3);
        assert_eq!(context.passages[0].source_title, "p0");
        assert_eq!(context.passages[1].source_title, "p1");
    }

    #[test]
    fn test_model_mismatch_on_construction() {
        let index = VectorIndex::build(
            ModelIdentity::new("hashing", "2").unwrap(),
            SimilarityMetric::Cosine,
            vec![{
                let mut e = entry("a", "text", None);
                e.record.model = ModelIdentity::new("hashing", "2").unwrap();
                e
            }],
        )
        .unwrap();

        let result = Retriever::new(
            Arc::new(index),
            Arc::new(embedder()),
            EmbeddingConfig::default(),
            RetrievalConfig::default(),
        );
        assert!(matches!(
            result,
            Err(RetrieveError::Domain(DomainError::ModelMismatch { .. }))
        ));
    }
}
