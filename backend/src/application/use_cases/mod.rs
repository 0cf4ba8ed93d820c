pub mod answer;
pub mod retrieve;

pub use answer::{Answer, AnswerError, AnswerQuestion};
pub use retrieve::{RetrieveError, RetrieveResult, Retriever};
