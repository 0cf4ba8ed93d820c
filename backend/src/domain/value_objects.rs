/// Value objects for the domain layer
use super::base::{DomainError, DomainResult, ValueObject};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Collapse every whitespace run into a single space and trim the ends.
/// Case is preserved; this is the canonical form used for hashing and length comparison.
pub fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    for word in input.split_whitespace() {
        if !buf.is_empty() {
            buf.push(' ');
        }
        buf.push_str(word);
    }
    buf
}

/// SHA-256 hash (lowercase hex) over whitespace-collapsed text
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the canonical (whitespace-collapsed, case-preserved) form of `text`
    pub fn of_text(text: &str) -> Self {
        let canonical = collapse_whitespace(text);
        let digest = Sha256::digest(canonical.as_bytes());
        ContentHash(hex::encode(digest))
    }

    /// Rehydrate a previously computed hash
    pub fn from_hex(hex_digest: impl Into<String>) -> DomainResult<Self> {
        let hex_digest = hex_digest.into();
        if hex_digest.len() != 64 || !hex_digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidValue(format!(
                "Content hash must be 64 hex characters, got '{}'",
                hex_digest
            )));
        }
        Ok(ContentHash(hex_digest.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used inside chunk identifiers and log lines
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl ValueObject for ContentHash {}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable chunk identifier derived from the parent document hash and the chunk offset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn derive(document_hash: &ContentHash, char_start: usize) -> Self {
        ChunkId(format!("{}-{:08}", document_hash.short(), char_start))
    }

    pub fn new(id: impl Into<String>) -> DomainResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidValue("ChunkId cannot be empty".to_string()));
        }
        Ok(ChunkId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for ChunkId {}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A source URL handed over by a scraper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceUrl {
    value: String,
}

impl SourceUrl {
    pub fn new(url: impl Into<String>) -> DomainResult<Self> {
        let url = url.into();
        if url.is_empty() {
            return Err(DomainError::InvalidValue("URL cannot be empty".to_string()));
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(DomainError::InvalidValue(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        Ok(SourceUrl { value: url })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Get the host part of the URL
    pub fn domain(&self) -> Option<String> {
        self.value
            .split("://")
            .nth(1)?
            .split('/')
            .next()
            .map(|s| s.to_string())
    }

    /// Last path segment, used as a fallback document title
    pub fn file_name(&self) -> Option<String> {
        let path = self.value.split("://").nth(1)?;
        let path = path.split(['?', '#']).next()?;
        let (_, last) = path.trim_end_matches('/').rsplit_once('/')?;
        (!last.is_empty()).then(|| last.to_string())
    }
}

impl ValueObject for SourceUrl {}

impl TryFrom<String> for SourceUrl {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SourceUrl::new(value)
    }
}

impl From<SourceUrl> for String {
    fn from(url: SourceUrl) -> Self {
        url.value
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Institution tag (e.g. "cbk", "nse"), stored lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Institution(String);

impl Institution {
    pub fn new(tag: impl Into<String>) -> DomainResult<Self> {
        let tag = tag.into().trim().to_lowercase();
        if tag.is_empty() {
            return Err(DomainError::InvalidValue(
                "Institution tag cannot be empty".to_string(),
            ));
        }
        Ok(Institution(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Institution {}

impl TryFrom<String> for Institution {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Institution::new(value)
    }
}

impl From<Institution> for String {
    fn from(institution: Institution) -> Self {
        institution.0
    }
}

impl fmt::Display for Institution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the embedding model that produced a vector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelIdentity {
    id: String,
    version: String,
}

impl ModelIdentity {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> DomainResult<Self> {
        let id = id.into();
        let version = version.into();
        if id.trim().is_empty() {
            return Err(DomainError::InvalidValue("Model id cannot be empty".to_string()));
        }
        if version.trim().is_empty() {
            return Err(DomainError::InvalidValue(
                "Model version cannot be empty".to_string(),
            ));
        }
        Ok(ModelIdentity { id, version })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Fail with `ModelMismatch` unless `other` is the same model and version
    pub fn ensure_matches(&self, other: &ModelIdentity) -> DomainResult<()> {
        if self != other {
            return Err(DomainError::ModelMismatch {
                expected: self.to_string(),
                found: other.to_string(),
            });
        }
        Ok(())
    }
}

impl ValueObject for ModelIdentity {}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}

/// Similarity metric, fixed per index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    InnerProduct,
}

impl SimilarityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::InnerProduct => "inner_product",
        }
    }

    /// Score two vectors given their precomputed norms
    pub fn score(&self, a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            SimilarityMetric::InnerProduct => dot,
            SimilarityMetric::Cosine => {
                if a_norm == 0.0 || b_norm == 0.0 {
                    0.0
                } else {
                    dot / (a_norm * b_norm)
                }
            }
        }
    }
}

impl ValueObject for SimilarityMetric {}

impl FromStr for SimilarityMetric {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "inner_product" | "ip" | "dot" => Ok(SimilarityMetric::InnerProduct),
            other => Err(DomainError::InvalidValue(format!(
                "Unknown similarity metric: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dense embedding vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct EmbeddingVector {
    dimensions: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(dimensions: Vec<f32>) -> DomainResult<Self> {
        if dimensions.is_empty() {
            return Err(DomainError::InvalidValue(
                "Embedding vector cannot be empty".to_string(),
            ));
        }
        if dimensions.iter().any(|v| !v.is_finite()) {
            return Err(DomainError::InvalidValue(
                "Embedding vector contains non-finite values".to_string(),
            ));
        }
        Ok(EmbeddingVector { dimensions })
    }

    pub fn dimensions(&self) -> &[f32] {
        &self.dimensions
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    pub fn norm(&self) -> f32 {
        self.dimensions.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    pub fn cosine_similarity(&self, other: &EmbeddingVector) -> DomainResult<f32> {
        if self.dimension_count() != other.dimension_count() {
            return Err(DomainError::DimensionMismatch {
                expected: self.dimension_count(),
                found: other.dimension_count(),
            });
        }
        Ok(SimilarityMetric::Cosine.score(
            &self.dimensions,
            self.norm(),
            &other.dimensions,
            other.norm(),
        ))
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.dimensions
    }
}

impl ValueObject for EmbeddingVector {}

impl TryFrom<Vec<f32>> for EmbeddingVector {
    type Error = DomainError;

    fn try_from(value: Vec<f32>) -> Result<Self, Self::Error> {
        EmbeddingVector::new(value)
    }
}

impl From<EmbeddingVector> for Vec<f32> {
    fn from(vector: EmbeddingVector) -> Self {
        vector.dimensions
    }
}
