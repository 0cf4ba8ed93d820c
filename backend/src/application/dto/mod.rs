mod build;
mod retrieval;

pub use build::{
    BuildProgressEvent, BuildSummary, DedupDiscard, DiscardReason, DocumentFailure, EmbeddingGap,
};
pub use retrieval::{Citation, GroundedContext, Passage, RetrievalRequest, NO_VERIFIED_INFORMATION};
