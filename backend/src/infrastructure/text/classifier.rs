/// Keyword classification of documents into broad regulatory classes
use std::sync::OnceLock;

/// Category assigned when no keyword matches
pub const OTHER_CATEGORY: &str = "other";

/// Characters of body text considered alongside the title
const PREVIEW_CHARS: usize = 500;

/// Classes in priority order; the first with a matching keyword wins
const CLASSES: &[(&str, &[&str])] = &[
    (
        "policy",
        &["monetary policy", "fiscal policy", "tax policy", "regulation"],
    ),
    (
        "report",
        &[
            "annual report",
            "quarterly report",
            "financial stability",
            "economic survey",
            "statistical bulletin",
        ],
    ),
    (
        "notice",
        &["public notice", "circular", "gazette", "press release"],
    ),
    (
        "guideline",
        &["guideline", "manual", "procedure", "framework", "rules"],
    ),
    (
        "data",
        &["statistics", "data", "indices", "rates", "survey results"],
    ),
    (
        "education",
        &[
            "financial literacy",
            "how to",
            "guide",
            "tips",
            "lesson",
            "tutorial",
            "workshop",
            "training",
            "learn",
            "beginner",
        ],
    ),
    (
        "news",
        &[
            "news",
            "article",
            "update",
            "breaking",
            "opinion",
            "analysis",
            "commentary",
            "editorial",
            "market review",
            "weekly brief",
        ],
    ),
    (
        "product_info",
        &[
            "product",
            "account",
            "loan",
            "savings",
            "insurance",
            "tariff",
            "charges",
            "fees",
            "interest rate",
            "terms",
        ],
    ),
];

/// Assigns a category to documents whose source did not supply one
#[derive(Debug, Default)]
pub struct DocumentClassifier;

impl DocumentClassifier {
    pub fn new() -> Self {
        DocumentClassifier
    }

    pub fn instance() -> &'static Self {
        static INSTANCE: OnceLock<DocumentClassifier> = OnceLock::new();
        INSTANCE.get_or_init(DocumentClassifier::new)
    }

    /// Match the title and the start of the text against each class's keywords.
    /// Matching is by lowercase substring.
    pub fn classify(&self, title: &str, text: &str) -> &'static str {
        let mut combined = title.to_lowercase();
        combined.push(' ');
        combined.extend(text.chars().take(PREVIEW_CHARS).flat_map(char::to_lowercase));

        CLASSES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| combined.contains(k)))
            .map(|(class, _)| *class)
            .unwrap_or(OTHER_CATEGORY)
    }
}
