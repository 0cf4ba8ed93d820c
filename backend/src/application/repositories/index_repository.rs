use crate::domain::aggregates::VectorIndex;
use crate::domain::base::DomainError;
use crate::domain::value_objects::ModelIdentity;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("No index stored at {0}")]
    NotFound(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl StorageError {
    /// The stored index is damaged (as opposed to unreachable)
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StorageError::Domain(DomainError::IndexCorrupt(_)))
    }

    pub fn is_model_mismatch(&self) -> bool {
        matches!(self, StorageError::Domain(DomainError::ModelMismatch { .. }))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Durable storage for a [`VectorIndex`].
///
/// Implementations must make `persist` atomic: a reader sees either the
/// previous complete index or the new one, never a mix.
pub trait IndexRepository: Send + Sync {
    /// Replace the stored index with `index`
    fn persist(&self, index: &VectorIndex) -> StorageResult<()>;

    /// Load the stored index, validating it against its manifest.
    ///
    /// Fails with `DomainError::IndexCorrupt` when the stored parts disagree and
    /// `DomainError::ModelMismatch` when it was built with a model other than
    /// `expected`.
    fn load(&self, expected: &ModelIdentity) -> StorageResult<VectorIndex>;

    fn exists(&self) -> bool;
}
