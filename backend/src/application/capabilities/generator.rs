/// Answer-generation capability
use crate::application::dto::GroundedContext;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("Generation backend error: {0}")]
    Backend(String),

    #[error("Generation timed out")]
    Timeout,

    #[error("Malformed generation response: {0}")]
    MalformedResponse(String),
}

/// Produces an answer to `question` grounded only in `context`
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(
        &self,
        question: &str,
        context: &GroundedContext,
    ) -> Result<String, GenerateError>;
}
