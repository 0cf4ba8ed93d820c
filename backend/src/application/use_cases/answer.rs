use crate::application::capabilities::{AnswerGenerator, GenerateError};
use crate::application::dto::{Citation, GroundedContext, RetrievalRequest, NO_VERIFIED_INFORMATION};
use crate::application::use_cases::retrieve::{RetrieveError, Retriever};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnswerError {
    #[error(transparent)]
    Retrieve(#[from] RetrieveError),

    #[error("Answer generation failed: {0}")]
    Generate(#[from] GenerateError),
}

/// A generated answer and the sources it may cite
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// `citations[n - 1]` is the source behind an `[n]` marker in `text`
    pub citations: Vec<Citation>,
    pub context: GroundedContext,
}

impl Answer {
    /// True when no source was found and the fixed fallback was returned
    pub fn is_unverified(&self) -> bool {
        self.context.is_empty()
    }
}

/// Use case for answering a question from retrieved passages
pub struct AnswerQuestion {
    retriever: Arc<Retriever>,
    generator: Arc<dyn AnswerGenerator>,
    timeout: Duration,
}

impl AnswerQuestion {
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<dyn AnswerGenerator>,
        timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            generator,
            timeout,
        }
    }

    pub async fn execute(&self, request: &RetrievalRequest) -> Result<Answer, AnswerError> {
        let context = self.retriever.retrieve(request).await?;

        if context.is_empty() {
            info!("No passages retrieved, returning the unverified fallback");
            return Ok(Answer {
                text: NO_VERIFIED_INFORMATION.to_string(),
                citations: Vec::new(),
                context,
            });
        }

        let text = tokio::time::timeout(
            self.timeout,
            self.generator.generate(&request.question, &context),
        )
        .await
        .map_err(|_| {
            warn!("Answer generation exceeded {:?}", self.timeout);
            GenerateError::Timeout
        })??;

        Ok(Answer {
            text,
            citations: context.citations(),
            context,
        })
    }
}
