/// Text processing: normalization, chunking, classification and near-duplicate fingerprints
mod chunker;
mod classifier;
mod minhash;
mod normalizer;

pub use chunker::{Chunker, Span};
pub use classifier::{DocumentClassifier, OTHER_CATEGORY};
pub use minhash::{MinHasher, Signature};
pub use normalizer::TextNormalizer;
