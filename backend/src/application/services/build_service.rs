/// Index build service: raw scraped documents in, persisted vector index out
use crate::application::capabilities::Embedder;
use crate::application::dto::{
    BuildProgressEvent, BuildSummary, DedupDiscard, DiscardReason, DocumentFailure,
};
use crate::application::repositories::{IndexRepository, StorageError};
use crate::application::services::dedup_service::{DedupOutcome, DedupSession, Ordinal};
use crate::application::services::embedding_service::EmbeddingService;
use crate::application::services::index_writer::IndexWriter;
use crate::application::services::ProgressCallback;
use crate::config::{ConfigError, DedupConfig, Settings};
use crate::domain::aggregates::VectorIndex;
use crate::domain::base::{DomainError, Entity};
use crate::domain::entities::{Chunk, Document, EmbeddingRecord, IndexEntry, RawDocument};
use crate::domain::value_objects::{ChunkId, ContentHash, SimilarityMetric, SourceUrl};
use crate::infrastructure::loaders::DocumentLoader;
use crate::infrastructure::text::Chunker;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub type BuildResult<T> = Result<T, BuildError>;

/// The finished index, frozen for readers, and what happened on the way
#[derive(Debug)]
pub struct BuildOutput {
    pub index: Arc<VectorIndex>,
    pub summary: BuildSummary,
}

/// A loaded document that survived document-level dedup, with its chunks
struct ProcessedDocument {
    ordinal: Ordinal,
    document: Document,
    chunks: Vec<Chunk>,
}

#[derive(Default)]
struct WorkerOutput {
    documents: Vec<ProcessedDocument>,
    discards: Vec<DedupDiscard>,
    already_indexed: usize,
}

/// Per-document pipeline run on the blocking pool: load, normalize, dedup, chunk
struct DocumentWorker {
    loader: Arc<dyn DocumentLoader>,
    chunker: Chunker,
    session: Arc<DedupSession>,
    indexed: Arc<HashSet<ContentHash>>,
    /// Source of every submitted document, by position
    sources: Arc<Vec<SourceUrl>>,
}

impl DocumentWorker {
    fn process(&self, position: usize, raw: &RawDocument) -> Result<WorkerOutput, String> {
        let documents = self.loader.load(raw).map_err(|e| e.to_string())?;
        let mut output = WorkerOutput::default();

        for (sub, document) in documents.into_iter().enumerate() {
            let ordinal = (position, sub);
            let hash = document.content_hash().clone();

            if self.indexed.contains(&hash) {
                debug!("{} is already indexed", document.source_url());
                output.already_indexed += 1;
                continue;
            }

            match self.session.offer_document(&document, ordinal) {
                DedupOutcome::Kept => {}
                DedupOutcome::KeptReplacing { evicted } => {
                    for lost in evicted {
                        let Some(source_url) = self.sources.get(lost.ordinal.0) else {
                            continue;
                        };
                        debug!("{} replaces {}", document.source_url(), source_url);
                        output.discards.push(DedupDiscard {
                            document: lost.key,
                            source_url: source_url.clone(),
                            chunk_id: None,
                            reason: lost.reason,
                            duplicate_of: hash.to_string(),
                        });
                    }
                }
                DedupOutcome::ExactDuplicate { of } => {
                    debug!("{} is an exact duplicate", document.source_url());
                    output.discards.push(DedupDiscard {
                        document: hash,
                        source_url: document.source_url().clone(),
                        chunk_id: None,
                        reason: DiscardReason::Exact,
                        duplicate_of: of.to_string(),
                    });
                    continue;
                }
                DedupOutcome::NearDuplicate { of, similarity } => {
                    debug!(
                        "{} is a near duplicate ({:.3}) of {}",
                        document.source_url(),
                        similarity,
                        of.short()
                    );
                    output.discards.push(DedupDiscard {
                        document: hash,
                        source_url: document.source_url().clone(),
                        chunk_id: None,
                        reason: DiscardReason::Near { similarity },
                        duplicate_of: of.to_string(),
                    });
                    continue;
                }
            }

            let chunks = self.chunker.chunk(&document);
            output.documents.push(ProcessedDocument {
                ordinal,
                document,
                chunks,
            });
        }

        Ok(output)
    }
}

/// Builds and incrementally extends the vector index
pub struct IndexBuildService {
    loader: Arc<dyn DocumentLoader>,
    chunker: Chunker,
    embeddings: EmbeddingService,
    repository: Arc<dyn IndexRepository>,
    dedup: DedupConfig,
    metric: SimilarityMetric,
    max_concurrent_documents: usize,
}

impl IndexBuildService {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn Embedder>,
        repository: Arc<dyn IndexRepository>,
        settings: &Settings,
    ) -> BuildResult<Self> {
        settings.dedup.validate()?;
        Ok(IndexBuildService {
            loader,
            chunker: Chunker::new(settings.chunking)?,
            embeddings: EmbeddingService::new(embedder, settings.embedding.clone()),
            repository,
            dedup: settings.dedup,
            metric: settings.index.metric,
            max_concurrent_documents: settings.build.max_concurrent_documents.max(1),
        })
    }

    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent_documents = max_concurrent.max(1);
        self
    }

    /// Build a fresh index from `raw_documents` and persist it, replacing any stored index
    pub async fn build(
        &self,
        raw_documents: Vec<RawDocument>,
        progress: Option<ProgressCallback>,
    ) -> BuildResult<BuildOutput> {
        self.run(None, raw_documents, progress).await
    }

    /// Extend `existing` with `raw_documents` and persist the result.
    ///
    /// Documents and chunks already in `existing` are skipped, and new chunks
    /// that near-duplicate indexed ones are discarded.
    pub async fn update(
        &self,
        existing: &VectorIndex,
        raw_documents: Vec<RawDocument>,
        progress: Option<ProgressCallback>,
    ) -> BuildResult<BuildOutput> {
        existing.model().ensure_matches(self.embeddings.model())?;
        self.run(Some(existing), raw_documents, progress).await
    }

    async fn run(
        &self,
        existing: Option<&VectorIndex>,
        raw_documents: Vec<RawDocument>,
        progress: Option<ProgressCallback>,
    ) -> BuildResult<BuildOutput> {
        let start_time = Instant::now();
        let total = raw_documents.len();
        let model = self.embeddings.model().clone();
        info!(
            "{} index from {} documents with {}",
            if existing.is_some() { "Updating" } else { "Building" },
            total,
            model
        );

        if let Some(ref callback) = progress {
            callback(BuildProgressEvent::Started {
                total_documents: total,
            });
        }

        let session = Arc::new(match existing {
            Some(index) => DedupSession::seeded_from(self.dedup, index),
            None => DedupSession::new(self.dedup),
        });
        let indexed = Arc::new(existing.map(|i| i.document_hashes()).unwrap_or_default());
        let sources: Arc<Vec<SourceUrl>> = Arc::new(
            raw_documents
                .iter()
                .map(|raw| raw.metadata.source_url.clone())
                .collect(),
        );

        // Use bounded concurrency with a semaphore
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_documents));
        let (tx, mut rx) = mpsc::channel(100);

        for (position, raw) in raw_documents.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let worker = DocumentWorker {
                loader: Arc::clone(&self.loader),
                chunker: self.chunker.clone(),
                session: Arc::clone(&session),
                indexed: Arc::clone(&indexed),
                sources: Arc::clone(&sources),
            };

            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let source_url = raw.metadata.source_url.clone();
                let result = tokio::task::spawn_blocking(move || worker.process(position, &raw))
                    .await
                    .unwrap_or_else(|e| Err(format!("worker failed: {}", e)));
                tx.send((source_url, result)).await.ok();
            });
        }

        // Drop the original sender so the channel closes when all tasks complete
        drop(tx);

        let mut summary = BuildSummary {
            documents_total: total,
            ..Default::default()
        };
        let mut processed: Vec<ProcessedDocument> = Vec::new();
        let mut received = 0;

        while let Some((source_url, result)) = rx.recv().await {
            received += 1;
            match result {
                Ok(output) => {
                    summary.documents_loaded += 1;
                    summary.documents_already_indexed += output.already_indexed;
                    summary.discards.extend(output.discards);
                    processed.extend(output.documents);
                }
                Err(reason) => {
                    warn!("Skipping {}: {}", source_url, reason);
                    summary.parse_failures.push(DocumentFailure {
                        source_url: source_url.clone(),
                        reason,
                    });
                }
            }

            if let Some(ref callback) = progress {
                callback(BuildProgressEvent::DocumentProcessed {
                    source_url,
                    processed: received,
                    total,
                });
            }
        }

        // Workers finish in any order; everything below runs in submission order
        summary
            .parse_failures
            .sort_by(|a, b| a.source_url.as_str().cmp(b.source_url.as_str()));
        summary.discards.sort_by(|a, b| {
            a.document
                .cmp(&b.document)
                .then_with(|| a.source_url.as_str().cmp(b.source_url.as_str()))
        });
        processed.retain(|p| session.document_kept(p.document.content_hash(), p.ordinal));
        processed.sort_by_key(|p| p.ordinal);

        let (owners, chunks) = self.select_chunks(&mut processed, &session, existing, &mut summary);
        debug!(
            "{} documents kept, {} chunks to embed",
            processed.len(),
            chunks.len()
        );

        let embedded = self
            .embeddings
            .embed_chunks(&chunks, &model, progress.as_ref())
            .await;
        let mut records: HashMap<ChunkId, EmbeddingRecord> = embedded
            .records
            .into_iter()
            .map(|r| (r.chunk_id.clone(), r))
            .collect();
        summary.embedding_gaps = embedded.gaps;

        let mut entries = Vec::with_capacity(records.len());
        for (owner, chunk) in owners.iter().zip(&chunks) {
            if let Some(record) = records.remove(chunk.id()) {
                entries.push(IndexEntry::from_parts(chunk, &processed[*owner].document, record)?);
            }
        }

        let index = match existing {
            None => {
                let index = if entries.is_empty() {
                    VectorIndex::empty(model, self.metric, self.embeddings.dimension())?
                } else {
                    VectorIndex::build(model, self.metric, entries)?
                };
                let writer = IndexWriter::new(index, Arc::clone(&self.repository));
                writer.persist().await?;
                summary.chunks_indexed = writer.len().await;
                writer.freeze().await
            }
            Some(existing) => {
                let writer = IndexWriter::new(existing.clone(), Arc::clone(&self.repository));
                let outcome = writer.commit(entries).await?;
                summary.chunks_indexed = outcome.added;
                summary.chunks_already_indexed += outcome.skipped_duplicates;
                writer.freeze().await
            }
        };

        if let Some(ref callback) = progress {
            callback(BuildProgressEvent::Persisted {
                entries: index.len(),
            });
        }

        summary.duration = start_time.elapsed();
        let duration_ms = summary.duration.as_millis() as u64;

        if let Some(ref callback) = progress {
            callback(BuildProgressEvent::Completed {
                chunks_indexed: summary.chunks_indexed,
                duration_ms,
            });
        }

        info!(
            "Indexed {} chunks from {}/{} documents in {}ms ({} failed, {} discarded, {} embedding gaps)",
            summary.chunks_indexed,
            summary.documents_loaded,
            total,
            duration_ms,
            summary.parse_failures.len(),
            summary.discards.len(),
            summary.embedding_gaps.len()
        );

        Ok(BuildOutput { index, summary })
    }

    /// Chunk-level dedup over the kept documents, in order.
    /// Returns each surviving chunk with the position of its document in `processed`.
    fn select_chunks(
        &self,
        processed: &mut [ProcessedDocument],
        session: &DedupSession,
        existing: Option<&VectorIndex>,
        summary: &mut BuildSummary,
    ) -> (Vec<usize>, Vec<Chunk>) {
        let pending: Vec<Vec<Chunk>> = processed
            .iter_mut()
            .map(|document| std::mem::take(&mut document.chunks))
            .collect();
        let mut candidates: Vec<(usize, Chunk)> = Vec::new();

        for (doc_index, chunks) in pending.into_iter().enumerate() {
            let source_url = processed[doc_index].document.source_url();
            for chunk in chunks {
                if existing.is_some_and(|index| index.contains(chunk.id())) {
                    summary.chunks_already_indexed += 1;
                    continue;
                }

                let discard = |reason, of: ChunkId| DedupDiscard {
                    document: chunk.document_hash().clone(),
                    source_url: source_url.clone(),
                    chunk_id: Some(chunk.id().clone()),
                    reason,
                    duplicate_of: of.to_string(),
                };

                match session.offer_chunk(&chunk, (doc_index, chunk.ordinal())) {
                    DedupOutcome::Kept => candidates.push((doc_index, chunk)),
                    DedupOutcome::KeptReplacing { evicted } => {
                        for lost in evicted {
                            let Some(owner) = processed.get(lost.ordinal.0) else {
                                continue;
                            };
                            summary.discards.push(DedupDiscard {
                                document: owner.document.content_hash().clone(),
                                source_url: owner.document.source_url().clone(),
                                chunk_id: Some(lost.key),
                                reason: lost.reason,
                                duplicate_of: chunk.id().to_string(),
                            });
                        }
                        candidates.push((doc_index, chunk));
                    }
                    DedupOutcome::ExactDuplicate { of } => {
                        summary.discards.push(discard(DiscardReason::Exact, of));
                    }
                    DedupOutcome::NearDuplicate { of, similarity } => {
                        summary
                            .discards
                            .push(discard(DiscardReason::Near { similarity }, of));
                    }
                }
            }
        }

        candidates.retain(|(_, chunk)| session.chunk_kept(chunk.id()));
        candidates.into_iter().unzip()
    }
}
