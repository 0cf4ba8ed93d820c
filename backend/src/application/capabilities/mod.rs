/// Narrow interfaces over external model capabilities
mod embedder;
mod generator;

pub use embedder::{EmbedError, Embedder};
pub use generator::{AnswerGenerator, GenerateError};
