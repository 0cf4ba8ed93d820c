/// Single-writer access to a vector index and its durable copy
use crate::application::repositories::{IndexRepository, StorageError, StorageResult};
use crate::domain::aggregates::{AddOutcome, VectorIndex};
use crate::domain::entities::IndexEntry;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Serializes appends and persists behind one lock.
///
/// Readers never take the lock: they work on a frozen snapshot from
/// [`IndexWriter::freeze`], which later writes do not affect.
pub struct IndexWriter {
    index: Mutex<VectorIndex>,
    repository: Arc<dyn IndexRepository>,
}

impl IndexWriter {
    pub fn new(index: VectorIndex, repository: Arc<dyn IndexRepository>) -> Self {
        IndexWriter {
            index: Mutex::new(index),
            repository,
        }
    }

    /// Append entries in memory only
    pub async fn add(&self, entries: Vec<IndexEntry>) -> StorageResult<AddOutcome> {
        let mut index = self.index.lock().await;
        Ok(index.add(entries)?)
    }

    pub async fn persist(&self) -> StorageResult<()> {
        let index = self.index.lock().await;
        self.store(index.clone()).await?;
        Ok(())
    }

    /// Append and persist as one step.
    ///
    /// The entries are applied to a copy that replaces the live index only once
    /// it is durably stored, so a failed persist leaves both untouched.
    pub async fn commit(&self, entries: Vec<IndexEntry>) -> StorageResult<AddOutcome> {
        let mut index = self.index.lock().await;
        let mut next = index.clone();
        let outcome = next.add(entries)?;
        *index = self.store(next).await?;
        info!(
            "Committed {} entries ({} already present), index now holds {}",
            outcome.added,
            outcome.skipped_duplicates,
            index.len()
        );
        Ok(outcome)
    }

    /// Write `index` on the blocking pool and hand it back once stored
    async fn store(&self, index: VectorIndex) -> StorageResult<VectorIndex> {
        let repository = Arc::clone(&self.repository);
        tokio::task::spawn_blocking(move || repository.persist(&index).map(|()| index))
            .await
            .map_err(|e| StorageError::Backend(format!("persist task failed: {}", e)))?
    }

    /// Immutable snapshot for concurrent readers
    pub async fn freeze(&self) -> Arc<VectorIndex> {
        Arc::new(self.index.lock().await.clone())
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
