/// Domain entities
use super::base::{DomainError, DomainResult, Entity};
use super::value_objects::{
    collapse_whitespace, ChunkId, ContentHash, EmbeddingVector, Institution, ModelIdentity,
    SourceUrl,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance handed to the loader by a scraper together with the raw bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_url: SourceUrl,
    pub institution: Institution,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl SourceMetadata {
    pub fn new(source_url: SourceUrl, institution: Institution, fetched_at: DateTime<Utc>) -> Self {
        SourceMetadata {
            source_url,
            institution,
            fetched_at,
            category: None,
            title: None,
            content_type: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Raw scraped bytes awaiting loading
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    pub metadata: SourceMetadata,
}

impl RawDocument {
    pub fn new(bytes: impl Into<Vec<u8>>, metadata: SourceMetadata) -> Self {
        RawDocument {
            bytes: bytes.into(),
            metadata,
        }
    }
}

/// Source format a document was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Html,
    Text,
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Html => "html",
            DocumentFormat::Text => "text",
        };
        write!(f, "{}", name)
    }
}

/// A normalized document. Immutable once created; a re-scrape produces a new Document.
#[derive(Debug, Clone)]
pub struct Document {
    content_hash: ContentHash,
    source_url: SourceUrl,
    institution: Institution,
    category: Option<String>,
    title: String,
    fetched_at: DateTime<Utc>,
    published_at: Option<NaiveDate>,
    format: DocumentFormat,
    page_count: usize,
    text: String,
}

impl Document {
    pub fn new(
        metadata: &SourceMetadata,
        title: impl Into<String>,
        format: DocumentFormat,
        page_count: usize,
        text: impl Into<String>,
        published_at: Option<NaiveDate>,
    ) -> Self {
        let text = text.into();
        Document {
            content_hash: ContentHash::of_text(&text),
            source_url: metadata.source_url.clone(),
            institution: metadata.institution.clone(),
            category: metadata.category.clone(),
            title: title.into(),
            fetched_at: metadata.fetched_at,
            published_at,
            format,
            page_count,
            text,
        }
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    /// Replace the category, e.g. with one derived from the content
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn source_url(&self) -> &SourceUrl {
        &self.source_url
    }

    pub fn institution(&self) -> &Institution {
        &self.institution
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn published_at(&self) -> Option<NaiveDate> {
        self.published_at
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Character count of the whitespace-collapsed text; the "completeness" measure for dedup
    pub fn canonical_len(&self) -> usize {
        collapse_whitespace(&self.text).chars().count()
    }
}

impl Entity for Document {
    type Id = ContentHash;

    fn id(&self) -> &Self::Id {
        &self.content_hash
    }
}

/// A bounded span of a document's text, the unit that gets embedded and retrieved
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    id: ChunkId,
    document_hash: ContentHash,
    ordinal: usize,
    text: String,
    char_start: usize,
    char_end: usize,
    overlap_chars: usize,
    content_hash: ContentHash,
    section_title: Option<String>,
}

impl Chunk {
    /// `char_start`/`char_end` are character (not byte) offsets into the document text
    pub fn new(
        document_hash: &ContentHash,
        ordinal: usize,
        text: impl Into<String>,
        char_start: usize,
        char_end: usize,
        overlap_chars: usize,
    ) -> Self {
        let text = text.into();
        Chunk {
            id: ChunkId::derive(document_hash, char_start),
            document_hash: document_hash.clone(),
            ordinal,
            content_hash: ContentHash::of_text(&text),
            text,
            char_start,
            char_end,
            overlap_chars,
            section_title: None,
        }
    }

    pub fn with_section_title(mut self, title: Option<String>) -> Self {
        self.section_title = title;
        self
    }

    pub fn document_hash(&self) -> &ContentHash {
        &self.document_hash
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn char_start(&self) -> usize {
        self.char_start
    }

    pub fn char_end(&self) -> usize {
        self.char_end
    }

    pub fn char_len(&self) -> usize {
        self.char_end - self.char_start
    }

    /// Characters shared with the previous chunk of the same document
    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.content_hash
    }

    /// Heading of the section the chunk's own text starts in
    pub fn section_title(&self) -> Option<&str> {
        self.section_title.as_deref()
    }
}

impl Entity for Chunk {
    type Id = ChunkId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A chunk's vector under a specific model version
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub chunk_id: ChunkId,
    pub vector: EmbeddingVector,
    pub model: ModelIdentity,
}

/// Metadata denormalized onto every index entry so filters need no join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub document_hash: ContentHash,
    pub institution: Institution,
    pub category: Option<String>,
    pub title: String,
    #[serde(default)]
    pub section_title: Option<String>,
    pub source_url: SourceUrl,
    pub published_at: Option<NaiveDate>,
    pub fetched_at: DateTime<Utc>,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// Embedding record plus its metadata, the unit stored in the vector index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub record: EmbeddingRecord,
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    /// Join a chunk with its parent document and embedding.
    /// Fails if the record or chunk belong to someone else.
    pub fn from_parts(
        chunk: &Chunk,
        document: &Document,
        record: EmbeddingRecord,
    ) -> DomainResult<Self> {
        if &record.chunk_id != chunk.id() {
            return Err(DomainError::InvalidValue(format!(
                "Embedding record {} does not belong to chunk {}",
                record.chunk_id,
                chunk.id()
            )));
        }
        if chunk.document_hash() != document.content_hash() {
            return Err(DomainError::InvalidValue(format!(
                "Chunk {} does not belong to document {}",
                chunk.id(),
                document.content_hash().short()
            )));
        }

        Ok(IndexEntry {
            record,
            metadata: EntryMetadata {
                document_hash: document.content_hash().clone(),
                institution: document.institution().clone(),
                category: document.category().map(|c| c.to_string()),
                title: document.title().to_string(),
                section_title: chunk.section_title().map(|t| t.to_string()),
                source_url: document.source_url().clone(),
                published_at: document.published_at(),
                fetched_at: document.fetched_at(),
                text: chunk.text().to_string(),
                char_start: chunk.char_start(),
                char_end: chunk.char_end(),
            },
        })
    }

    pub fn chunk_id(&self) -> &ChunkId {
        &self.record.chunk_id
    }
}
