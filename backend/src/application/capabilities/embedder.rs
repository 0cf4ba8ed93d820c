/// Embedding capability
use crate::domain::value_objects::ModelIdentity;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
    #[error("Embedding backend error: {0}")]
    Backend(String),

    #[error("Embedding call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("Embedding model mismatch: backend serves {served}, caller asked for {requested}")]
    ModelMismatch { served: String, requested: String },
}

/// Turns texts into dense vectors.
///
/// `embed` returns one vector per input, in input order. Implementations refuse
/// requests for a model other than the one they serve.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &ModelIdentity;

    fn dimension(&self) -> usize;

    async fn embed(
        &self,
        texts: &[String],
        model: &ModelIdentity,
    ) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Fail with `ModelMismatch` unless `requested` is the served model
    fn check_model(&self, requested: &ModelIdentity) -> Result<(), EmbedError> {
        if self.model() != requested {
            return Err(EmbedError::ModelMismatch {
                served: self.model().to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(())
    }
}
