pub mod capabilities;
pub mod dto;
pub mod repositories;
pub mod services;
pub mod use_cases;

// Re-export key types to avoid naming conflicts
pub use capabilities::{AnswerGenerator, EmbedError, Embedder, GenerateError};
pub use dto::{
    BuildProgressEvent, BuildSummary, Citation, GroundedContext, Passage, RetrievalRequest,
};
pub use repositories::{IndexRepository, StorageError};
pub use services::{
    BuildError, BuildOutput, BuildResult, DedupSession, EmbeddingService, IndexBuildService,
    IndexWriter, ProgressCallback,
};
pub use use_cases::{Answer, AnswerError, AnswerQuestion, RetrieveError, Retriever};
