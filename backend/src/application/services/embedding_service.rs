/// Service that turns chunks into embedding records through an [`Embedder`]
use crate::application::capabilities::{EmbedError, Embedder};
use crate::application::dto::{BuildProgressEvent, EmbeddingGap};
use crate::application::services::ProgressCallback;
use crate::config::EmbeddingConfig;
use crate::domain::base::Entity;
use crate::domain::entities::{Chunk, EmbeddingRecord};
use crate::domain::value_objects::{EmbeddingVector, ModelIdentity};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// Records for every chunk that embedded successfully, plus the batches that did not
#[derive(Debug, Default)]
pub struct EmbeddingOutcome {
    /// In input order
    pub records: Vec<EmbeddingRecord>,
    pub gaps: Vec<EmbeddingGap>,
}

/// Batches, bounds, times out and retries calls to the embedding backend
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    config: EmbeddingConfig,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, config: EmbeddingConfig) -> Self {
        EmbeddingService { embedder, config }
    }

    pub fn model(&self) -> &ModelIdentity {
        self.embedder.model()
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Embed chunks under `model`.
    ///
    /// Batches run concurrently up to `max_concurrent_batches`. A batch that
    /// still fails after `max_retries` retries becomes an [`EmbeddingGap`];
    /// its chunks get no record.
    pub async fn embed_chunks(
        &self,
        chunks: &[Chunk],
        model: &ModelIdentity,
        progress: Option<&ProgressCallback>,
    ) -> EmbeddingOutcome {
        if chunks.is_empty() {
            return EmbeddingOutcome::default();
        }

        let batches: Vec<&[Chunk]> = chunks.chunks(self.config.batch_size.max(1)).collect();
        info!(
            "Embedding {} chunks in {} batches with {}",
            chunks.len(),
            batches.len(),
            model
        );
        if let Some(callback) = progress {
            callback(BuildProgressEvent::EmbeddingStarted {
                chunks: chunks.len(),
                batches: batches.len(),
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_batches.max(1)));
        let (tx, mut rx) = mpsc::channel(batches.len());

        for (batch_index, batch) in batches.iter().enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text().to_string()).collect();
            let semaphore = Arc::clone(&semaphore);
            let embedder = Arc::clone(&self.embedder);
            let config = self.config.clone();
            let model = model.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let result = embed_with_retry(embedder.as_ref(), &texts, &model, &config).await;
                tx.send((batch_index, result)).await.ok();
            });
        }
        drop(tx);

        let mut results: Vec<Option<Result<Vec<EmbeddingVector>, (u32, EmbedError)>>> =
            (0..batches.len()).map(|_| None).collect();
        while let Some((batch_index, result)) = rx.recv().await {
            if let (Ok(vectors), Some(callback)) = (&result, progress) {
                callback(BuildProgressEvent::BatchEmbedded {
                    batch_index,
                    chunks: vectors.len(),
                });
            }
            results[batch_index] = Some(result);
        }

        let mut outcome = EmbeddingOutcome::default();
        for (batch_index, (batch, result)) in batches.iter().zip(results).enumerate() {
            // A task that never reported (panicked or cancelled) counts as a gap
            let result = result.unwrap_or_else(|| {
                Err((0, EmbedError::Backend("embedding task did not complete".to_string())))
            });
            match result {
                Ok(vectors) => {
                    outcome
                        .records
                        .extend(batch.iter().zip(vectors).map(|(chunk, vector)| EmbeddingRecord {
                            chunk_id: chunk.id().clone(),
                            vector,
                            model: model.clone(),
                        }));
                }
                Err((attempts, error)) => {
                    warn!(
                        "Batch {} of {} chunks left out after {} attempts: {}",
                        batch_index,
                        batch.len(),
                        attempts,
                        error
                    );
                    outcome.gaps.push(EmbeddingGap {
                        batch_index,
                        chunk_ids: batch.iter().map(|c| c.id().clone()).collect(),
                        attempts,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            "Embedded {} chunks, {} batches failed",
            outcome.records.len(),
            outcome.gaps.len()
        );
        outcome
    }

    /// Embed a single query text under `model`
    pub async fn embed_query(
        &self,
        text: &str,
        model: &ModelIdentity,
    ) -> Result<EmbeddingVector, EmbedError> {
        let texts = [text.to_string()];
        let mut vectors = embed_with_retry(self.embedder.as_ref(), &texts, model, &self.config)
            .await
            .map_err(|(_, e)| e)?;
        vectors
            .pop()
            .ok_or_else(|| EmbedError::MalformedResponse("no vector for query".to_string()))
    }
}

/// One call with timeout and response validation
async fn embed_once(
    embedder: &dyn Embedder,
    texts: &[String],
    model: &ModelIdentity,
    config: &EmbeddingConfig,
) -> Result<Vec<EmbeddingVector>, EmbedError> {
    let timeout = config.request_timeout();
    let raw = tokio::time::timeout(timeout, embedder.embed(texts, model))
        .await
        .map_err(|_| EmbedError::Timeout(timeout))??;

    if raw.len() != texts.len() {
        return Err(EmbedError::MalformedResponse(format!(
            "expected {} vectors, got {}",
            texts.len(),
            raw.len()
        )));
    }

    let expected = embedder.dimension();
    raw.into_iter()
        .map(|values| {
            if values.len() != expected {
                return Err(EmbedError::MalformedResponse(format!(
                    "expected dimension {}, got {}",
                    expected,
                    values.len()
                )));
            }
            EmbeddingVector::new(values).map_err(|e| EmbedError::MalformedResponse(e.to_string()))
        })
        .collect()
}

/// Retries with exponential backoff; the error carries the number of attempts made
async fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: &[String],
    model: &ModelIdentity,
    config: &EmbeddingConfig,
) -> Result<Vec<EmbeddingVector>, (u32, EmbedError)> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match embed_once(embedder, texts, model, config).await {
            Ok(vectors) => {
                debug!("Embedded {} texts on attempt {}", texts.len(), attempt);
                return Ok(vectors);
            }
            // Retrying cannot fix a request for the wrong model
            Err(e @ EmbedError::ModelMismatch { .. }) => return Err((attempt, e)),
            Err(e) if attempt > config.max_retries => return Err((attempt, e)),
            Err(e) => {
                let delay = config.backoff(attempt);
                warn!(
                    "Embedding attempt {} failed ({}), retrying in {:?}",
                    attempt, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
