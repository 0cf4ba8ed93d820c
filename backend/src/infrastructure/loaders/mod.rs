/// Document loaders: raw scraped bytes in, normalized documents out
mod html;
mod pdf;
mod tables;

pub use html::{HtmlExtraction, HtmlExtractor};
pub use pdf::{is_header_or_footer, strip_headers_and_footers, PdfExtraction};
pub use tables::{render_tables, TextTable};

use crate::config::LoaderConfig;
use crate::domain::entities::{Document, DocumentFormat, RawDocument};
use crate::infrastructure::text::{DocumentClassifier, TextNormalizer};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unreadable document: {0}")]
    Unreadable(String),

    #[error("Document is encrypted")]
    Encrypted,

    #[error("Document has {chars} characters of text, fewer than the minimum {min}")]
    Empty { chars: usize, min: usize },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Turns one raw document into zero or more normalized documents
pub trait DocumentLoader: Send + Sync {
    fn load(&self, raw: &RawDocument) -> ParseResult<Vec<Document>>;
}

/// Sniff the format from magic bytes, the declared content type and leading markup
pub fn detect_format(bytes: &[u8], content_type: Option<&str>) -> ParseResult<DocumentFormat> {
    let head = &bytes[..bytes.len().min(1024)];
    let leading = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&head[..0], |p| &head[p..]);

    if leading.starts_with(b"%PDF-") {
        return Ok(DocumentFormat::Pdf);
    }

    let declared = content_type.map(|c| c.to_ascii_lowercase()).unwrap_or_default();
    if declared.contains("application/pdf") {
        // Declared PDF without the magic: the download is broken
        return Err(ParseError::Unreadable("missing %PDF- header".to_string()));
    }

    let sniff = String::from_utf8_lossy(leading).to_ascii_lowercase();
    let sniff = sniff.trim_start_matches('\u{feff}');
    let looks_like_markup = ["<!doctype html", "<html", "<head", "<body", "<!--", "<meta", "<div"]
        .iter()
        .any(|marker| sniff.starts_with(marker));
    if declared.contains("html") || looks_like_markup {
        return Ok(DocumentFormat::Html);
    }

    if std::str::from_utf8(bytes).is_ok() {
        return Ok(DocumentFormat::Text);
    }

    Err(ParseError::UnsupportedFormat(if declared.is_empty() {
        "binary content".to_string()
    } else {
        declared
    }))
}

/// Loader for PDF, HTML and plain text
#[derive(Debug, Clone)]
pub struct FormatLoader {
    config: LoaderConfig,
}

struct Extracted {
    format: DocumentFormat,
    title: Option<String>,
    published_at: Option<NaiveDate>,
    page_count: usize,
    text: String,
}

impl FormatLoader {
    pub fn new(config: LoaderConfig) -> Self {
        FormatLoader { config }
    }

    fn extract(&self, raw: &RawDocument) -> ParseResult<Extracted> {
        let format = detect_format(&raw.bytes, raw.metadata.content_type.as_deref())?;
        debug!("Detected {} for {}", format, raw.metadata.source_url);

        match format {
            DocumentFormat::Pdf => {
                let extraction = pdf::extract(&raw.bytes)?;
                let page_count = extraction.pages.len();
                let pages = if self.config.strip_headers_footers {
                    strip_headers_and_footers(&extraction.pages)
                } else {
                    extraction.pages
                };
                let text = pages
                    .iter()
                    .map(|page| self.tables(page))
                    .filter(|page| !page.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                Ok(Extracted {
                    format,
                    title: extraction.title,
                    published_at: extraction.created_on,
                    page_count,
                    text,
                })
            }
            DocumentFormat::Html => {
                let extraction = HtmlExtractor::instance().extract(&raw.bytes);
                Ok(Extracted {
                    format,
                    title: extraction.title,
                    published_at: extraction.published_at,
                    page_count: 1,
                    text: extraction.text,
                })
            }
            DocumentFormat::Text => {
                let text = String::from_utf8_lossy(&raw.bytes);
                Ok(Extracted {
                    format,
                    title: None,
                    published_at: None,
                    page_count: 1,
                    text: self.tables(&text),
                })
            }
        }
    }

    fn tables(&self, text: &str) -> String {
        if self.config.extract_tables {
            render_tables(text)
        } else {
            text.to_string()
        }
    }
}

impl DocumentLoader for FormatLoader {
    fn load(&self, raw: &RawDocument) -> ParseResult<Vec<Document>> {
        let extracted = self.extract(raw)?;

        let normalizer = TextNormalizer::instance();
        let mut text = normalizer.normalize(&extracted.text);
        if self.config.normalize_currency {
            text = normalizer.normalize_currency(&text);
        }

        let chars = text.chars().count();
        if chars < self.config.min_text_chars {
            return Err(ParseError::Empty {
                chars,
                min: self.config.min_text_chars,
            });
        }
        if chars > self.config.max_text_chars {
            warn!(
                "Truncating {} from {} to {} characters",
                raw.metadata.source_url, chars, self.config.max_text_chars
            );
            text = text.chars().take(self.config.max_text_chars).collect();
        }

        let metadata = &raw.metadata;
        let title = metadata
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or(extracted.title)
            .or_else(|| metadata.source_url.file_name())
            .unwrap_or_else(|| metadata.source_url.to_string());

        let mut document = Document::new(
            metadata,
            title,
            extracted.format,
            extracted.page_count,
            text,
            extracted.published_at,
        );
        if document.category().is_none() {
            let category =
                DocumentClassifier::instance().classify(document.title(), document.text());
            document = document.with_category(category);
        }

        Ok(vec![document])
    }
}
