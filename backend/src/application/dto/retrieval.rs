use crate::config::RerankStrategy;
use crate::domain::aggregates::SearchFilter;
use crate::domain::value_objects::{ChunkId, Institution, SourceUrl};
use chrono::NaiveDate;
use std::fmt::Write;

/// Fixed reply when no passage survives retrieval
pub const NO_VERIFIED_INFORMATION: &str = "I don't have verified information about this from my sources. \
I recommend checking the relevant institution's official website.";

/// Retrieval request parameters
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// The natural-language question
    pub question: String,
    /// Passages to return; the configured default when unset
    pub top_k: Option<usize>,
    /// Metadata restrictions applied before ranking
    pub filter: SearchFilter,
    /// Overrides the configured re-ranking for this request
    pub rerank: Option<RerankStrategy>,
    /// Reference date for recency re-ranking; today when unset
    pub as_of: Option<NaiveDate>,
}

impl RetrievalRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: None,
            filter: SearchFilter::any(),
            rerank: None,
            as_of: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_rerank(mut self, rerank: RerankStrategy) -> Self {
        self.rerank = Some(rerank);
        self
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }
}

/// A retrieved chunk with its attribution
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub chunk_id: ChunkId,
    pub text: String,
    pub source_title: String,
    /// Heading of the document section the passage sits in
    pub section_title: Option<String>,
    pub source_url: SourceUrl,
    pub institution: Institution,
    pub published_at: Option<NaiveDate>,
    /// Final score after re-ranking
    pub score: f32,
    /// Raw similarity from the index
    pub similarity: f32,
}

impl Passage {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Numbered source reference matching the `[n]` markers in an answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub number: usize,
    pub title: String,
    pub url: SourceUrl,
    pub institution: Institution,
}

/// Passages selected for one question, best first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundedContext {
    pub passages: Vec<Passage>,
    /// Characters of passage text in the context
    pub total_chars: usize,
    /// Passages that ranked in the top k but did not fit the budget
    pub dropped_for_budget: usize,
}

impl GroundedContext {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn citations(&self) -> Vec<Citation> {
        self.passages
            .iter()
            .enumerate()
            .map(|(i, p)| Citation {
                number: i + 1,
                title: p.source_title.clone(),
                url: p.source_url.clone(),
                institution: p.institution.clone(),
            })
            .collect()
    }

    /// Numbered passages, each headed `[n] title (section) — url`
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, passage) in self.passages.iter().enumerate() {
            if i > 0 {
                out.push_str("\n\n");
            }
            let _ = write!(out, "[{}] {}", i + 1, passage.source_title);
            if let Some(section) = &passage.section_title {
                let _ = write!(out, " ({})", section);
            }
            let _ = writeln!(out, " — {}", passage.source_url);
            out.push_str(&passage.text);
        }
        out
    }

    /// Prompt that restricts the model to this context and asks for `[n]` citations
    pub fn grounding_prompt(&self, question: &str) -> String {
        format!(
            "You are a Kenyan financial information assistant. Answer using ONLY the numbered \
sources below.\n\
\n\
RULES:\n\
1. Cite every claim inline with the number of its source, e.g. [1] or [2][3].\n\
2. If the sources do not contain the answer, reply exactly: \"{fallback}\"\n\
3. Use Kenyan financial terminology (KES, CBR, PAYE, NSE-20) and explain terms simply.\n\
4. Be concise. Answer directly without \"According to\" or \"Based on\".\n\
5. When sources from different institutions disagree, present both views.\n\
\n\
SOURCES:\n\
{context}\n\
\n\
QUESTION: {question}\n\
\n\
ANSWER:",
            fallback = NO_VERIFIED_INFORMATION,
            context = self.render(),
            question = question.trim(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(title: &str, url: &str, text: &str) -> Passage {
        Passage {
            chunk_id: ChunkId::new(format!("{}-0", title)).unwrap(),
            text: text.to_string(),
            source_title: title.to_string(),
            section_title: None,
            source_url: SourceUrl::new(url).unwrap(),
            institution: Institution::new("cbk").unwrap(),
            published_at: None,
            score: 0.8,
            similarity: 0.8,
        }
    }

    #[test]
    fn test_render_numbers_passages() {
        let context = GroundedContext {
            passages: vec![
                passage("MPC Statement", "https://cbk.go.ke/mpc", "CBR is 9.75%."),
                passage("T-Bill Results", "https://cbk.go.ke/tbills", "91-day at 8.1%."),
            ],
            total_chars: 28,
            dropped_for_budget: 0,
        };

        assert_eq!(
            context.render(),
            "[1] MPC Statement — https://cbk.go.ke/mpc\nCBR is 9.75%.\n\n\
             [2] T-Bill Results — https://cbk.go.ke/tbills\n91-day at 8.1%."
        );

        let citations = context.citations();
        assert_eq!(citations[1].number, 2);
        assert_eq!(citations[1].title, "T-Bill Results");
    }

    #[test]
    fn test_render_names_the_section() {
        let mut outlook = passage("MPC Statement", "https://cbk.go.ke/mpc", "Inflation to ease.");
        outlook.section_title = Some("Outlook".to_string());
        let context = GroundedContext {
            passages: vec![outlook],
            total_chars: 18,
            dropped_for_budget: 0,
        };

        assert_eq!(
            context.render(),
            "[1] MPC Statement (Outlook) — https://cbk.go.ke/mpc\nInflation to ease."
        );
    }

    #[test]
    fn test_prompt_contains_context_and_question() {
        let context = GroundedContext {
            passages: vec![passage("MPC", "https://cbk.go.ke/mpc", "CBR is 9.75%.")],
            total_chars: 13,
            dropped_for_budget: 0,
        };

        let prompt = context.grounding_prompt("  What is the CBR? ");
        assert!(prompt.contains("[1] MPC — https://cbk.go.ke/mpc"));
        assert!(prompt.contains("QUESTION: What is the CBR?\n"));
        assert!(prompt.contains(NO_VERIFIED_INFORMATION));
    }

    #[test]
    fn test_request_builder() {
        let request = RetrievalRequest::new("rates")
            .with_top_k(3)
            .with_rerank(RerankStrategy::LexicalOverlap { weight: 0.3 });
        assert_eq!(request.top_k, Some(3));
        assert!(request.filter.is_unrestricted());
        assert!(request.rerank.is_some());
    }
}
