mod index_repository;

pub use index_repository::{IndexRepository, StorageError, StorageResult};
