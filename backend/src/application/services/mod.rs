pub mod build_service;
pub mod dedup_service;
pub mod embedding_service;
pub mod index_writer;

use crate::application::dto::BuildProgressEvent;
use std::sync::Arc;

/// Callback type for progress events
pub type ProgressCallback = Arc<dyn Fn(BuildProgressEvent) + Send + Sync>;

pub use build_service::{BuildError, BuildOutput, BuildResult, IndexBuildService};
pub use dedup_service::{DedupOutcome, DedupSession, Deduplicator, Evicted, Ordinal};
pub use embedding_service::{EmbeddingOutcome, EmbeddingService};
pub use index_writer::IndexWriter;
