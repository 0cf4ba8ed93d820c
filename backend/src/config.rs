/// Runtime settings for index building and retrieval
use crate::domain::value_objects::SimilarityMetric;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Prefix for every environment override
pub const ENV_PREFIX: &str = "FINRAG_";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {section} configuration: {reason}")]
    Invalid { section: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(section: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            section,
            reason: reason.into(),
        }
    }
}

/// Document loading and text cleaning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Documents with fewer extracted characters are rejected as empty
    pub min_text_chars: usize,
    /// Longer documents are truncated to this many characters
    pub max_text_chars: usize,
    /// Rewrite `KSh`, `Kshs.` and friends to `KES`
    pub normalize_currency: bool,
    pub strip_headers_footers: bool,
    pub extract_tables: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            min_text_chars: 50,
            max_text_chars: 5_000_000,
            normalize_currency: true,
            strip_headers_footers: true,
            extract_tables: true,
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_text_chars <= self.min_text_chars {
            return Err(ConfigError::invalid(
                "loader",
                "max_text_chars must exceed min_text_chars",
            ));
        }
        Ok(())
    }
}

/// Character-based chunk boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chunk_chars: usize,
    pub min_chunk_chars: usize,
    pub overlap_chars: usize,
    /// How far back from the size limit the chunker searches for a break
    pub boundary_window_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            max_chunk_chars: 1200,
            min_chunk_chars: 300,
            overlap_chars: 200,
            boundary_window_chars: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_chunk_chars == 0 {
            return Err(ConfigError::invalid("chunking", "min_chunk_chars must be positive"));
        }
        if self.overlap_chars >= self.min_chunk_chars {
            return Err(ConfigError::invalid(
                "chunking",
                format!(
                    "overlap_chars ({}) must be smaller than min_chunk_chars ({})",
                    self.overlap_chars, self.min_chunk_chars
                ),
            ));
        }
        if self.min_chunk_chars * 2 > self.max_chunk_chars {
            return Err(ConfigError::invalid(
                "chunking",
                format!(
                    "max_chunk_chars ({}) must be at least twice min_chunk_chars ({})",
                    self.max_chunk_chars, self.min_chunk_chars
                ),
            ));
        }
        if self.boundary_window_chars >= self.max_chunk_chars {
            return Err(ConfigError::invalid(
                "chunking",
                "boundary_window_chars must be smaller than max_chunk_chars",
            ));
        }
        Ok(())
    }
}

/// Exact and near-duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub near_duplicates: bool,
    /// Words per shingle
    pub shingle_size: usize,
    pub bands: usize,
    pub rows_per_band: usize,
    /// Minimum estimated Jaccard similarity to call two texts near-duplicates
    pub threshold: f32,
    /// Seed for the MinHash permutations; changing it changes every signature
    pub seed: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        DedupConfig {
            near_duplicates: true,
            shingle_size: 5,
            bands: 32,
            rows_per_band: 4,
            threshold: 0.85,
            seed: 0x5eed_f1a9,
        }
    }
}

impl DedupConfig {
    pub fn permutations(&self) -> usize {
        self.bands * self.rows_per_band
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shingle_size == 0 {
            return Err(ConfigError::invalid("dedup", "shingle_size must be positive"));
        }
        if self.bands == 0 || self.rows_per_band == 0 {
            return Err(ConfigError::invalid(
                "dedup",
                "bands and rows_per_band must be positive",
            ));
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::invalid("dedup", "threshold must lie in (0, 1]"));
        }
        Ok(())
    }
}

/// Which embedding capability backs the build and the retriever
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    #[default]
    FastEmbed,
    OpenAiCompatible,
    /// Deterministic feature hashing; offline and model-free
    Hashing,
}

impl FromStr for EmbeddingBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fastembed" | "fast_embed" | "local" => Ok(EmbeddingBackend::FastEmbed),
            "openai" | "openai_compatible" => Ok(EmbeddingBackend::OpenAiCompatible),
            "hashing" => Ok(EmbeddingBackend::Hashing),
            other => Err(ConfigError::invalid(
                "embedding",
                format!("unknown backend '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model_id: String,
    pub model_version: String,
    /// Required for backends that cannot report their own dimension
    pub dimension: Option<usize>,
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            backend: EmbeddingBackend::FastEmbed,
            model_id: "BAAI/bge-base-en-v1.5".to_string(),
            model_version: "1".to_string(),
            dimension: None,
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            batch_size: 64,
            max_concurrent_batches: 4,
            max_retries: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl EmbeddingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Backoff before retry number `attempt` (1-based), doubling each time up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let millis = self
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("embedding", "batch_size must be positive"));
        }
        if self.max_concurrent_batches == 0 {
            return Err(ConfigError::invalid(
                "embedding",
                "max_concurrent_batches must be positive",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "embedding",
                "request_timeout_ms must be positive",
            ));
        }
        if self.model_id.trim().is_empty() || self.model_version.trim().is_empty() {
            return Err(ConfigError::invalid(
                "embedding",
                "model_id and model_version are required",
            ));
        }
        if self.dimension == Some(0) {
            return Err(ConfigError::invalid("embedding", "dimension must be positive"));
        }
        if matches!(
            self.backend,
            EmbeddingBackend::OpenAiCompatible | EmbeddingBackend::Hashing
        ) && self.dimension.is_none()
        {
            return Err(ConfigError::invalid(
                "embedding",
                "dimension is required for this backend",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub path: PathBuf,
    pub metric: SimilarityMetric,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            path: PathBuf::from("data/indices/finrag.sqlite"),
            metric: SimilarityMetric::Cosine,
        }
    }
}

/// Secondary signal mixed into the similarity score of the top candidates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RerankStrategy {
    #[default]
    None,
    /// Prefer recently published sources; the signal halves every `half_life_days`
    Recency { weight: f32, half_life_days: f32 },
    /// Prefer passages sharing words with the question
    LexicalOverlap { weight: f32 },
}

impl RerankStrategy {
    pub fn weight(&self) -> f32 {
        match self {
            RerankStrategy::None => 0.0,
            RerankStrategy::Recency { weight, .. } | RerankStrategy::LexicalOverlap { weight } => {
                *weight
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, RerankStrategy::None)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let weight = self.weight();
        if !(0.0..=1.0).contains(&weight) {
            return Err(ConfigError::invalid("retrieval", "rerank weight must lie in [0, 1]"));
        }
        if let RerankStrategy::Recency { half_life_days, .. } = self {
            if !(half_life_days.is_finite() && *half_life_days > 0.0) {
                return Err(ConfigError::invalid(
                    "retrieval",
                    "half_life_days must be positive",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub rerank: RerankStrategy,
    /// Candidates fetched before re-ranking; never fewer than `top_k`
    pub rerank_candidates: usize,
    pub max_context_chars: usize,
    /// Hits scoring below this are never used as grounding
    pub min_score: Option<f32>,
    pub query_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        RetrievalConfig {
            top_k: 5,
            rerank: RerankStrategy::None,
            rerank_candidates: 20,
            max_context_chars: 6_000,
            min_score: None,
            query_timeout_ms: 10_000,
        }
    }
}

impl RetrievalConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::invalid("retrieval", "top_k must be positive"));
        }
        if self.rerank.is_enabled() && self.rerank_candidates < self.top_k {
            return Err(ConfigError::invalid(
                "retrieval",
                "rerank_candidates must be at least top_k",
            ));
        }
        self.rerank.validate()?;
        if self.max_context_chars == 0 {
            return Err(ConfigError::invalid(
                "retrieval",
                "max_context_chars must be positive",
            ));
        }
        if self.query_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "retrieval",
                "query_timeout_ms must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Documents loaded, normalized and chunked concurrently
    pub max_concurrent_documents: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            max_concurrent_documents: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub ollama_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        GenerationConfig {
            ollama_url: "http://localhost:11434".to_string(),
            model: "llama3:8b-instruct-q4_K_M".to_string(),
            temperature: 0.0,
            request_timeout_ms: 120_000,
        }
    }
}

impl GenerationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::invalid(
                "logging",
                format!("unknown log format '{}'", other),
            )),
        }
    }
}

/// All settings, grouped by pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub loader: LoaderConfig,
    pub chunking: ChunkingConfig,
    pub dedup: DedupConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub build: BuildConfig,
    pub generation: GenerationConfig,
    pub log_format: LogFormat,
}

impl Settings {
    /// Defaults, then `.env`, then `FINRAG_*` process variables. The result is validated.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e).context("Failed to read .env file");
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (keys include the prefix)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        override_parsed(&get, "MIN_TEXT_CHARS", &mut settings.loader.min_text_chars)?;
        override_parsed(&get, "MAX_TEXT_CHARS", &mut settings.loader.max_text_chars)?;
        override_parsed(&get, "NORMALIZE_CURRENCY", &mut settings.loader.normalize_currency)?;

        override_parsed(&get, "MAX_CHUNK_CHARS", &mut settings.chunking.max_chunk_chars)?;
        override_parsed(&get, "MIN_CHUNK_CHARS", &mut settings.chunking.min_chunk_chars)?;
        override_parsed(&get, "OVERLAP_CHARS", &mut settings.chunking.overlap_chars)?;
        override_parsed(
            &get,
            "BOUNDARY_WINDOW_CHARS",
            &mut settings.chunking.boundary_window_chars,
        )?;

        override_parsed(&get, "NEAR_DUPLICATES", &mut settings.dedup.near_duplicates)?;
        override_parsed(&get, "DEDUP_THRESHOLD", &mut settings.dedup.threshold)?;
        override_parsed(&get, "SHINGLE_SIZE", &mut settings.dedup.shingle_size)?;

        override_parsed(&get, "EMBEDDING_BACKEND", &mut settings.embedding.backend)?;
        override_string(&get, "EMBEDDING_MODEL", &mut settings.embedding.model_id);
        override_string(&get, "EMBEDDING_MODEL_VERSION", &mut settings.embedding.model_version);
        if let Some(value) = get("EMBEDDING_DIMENSION") {
            settings.embedding.dimension = Some(parse_value("EMBEDDING_DIMENSION", &value)?);
        }
        override_string(&get, "EMBEDDING_API_BASE", &mut settings.embedding.api_base);
        if let Some(key) = get("EMBEDDING_API_KEY") {
            settings.embedding.api_key = Some(key);
        }
        override_parsed(&get, "EMBEDDING_BATCH_SIZE", &mut settings.embedding.batch_size)?;
        override_parsed(
            &get,
            "EMBEDDING_CONCURRENCY",
            &mut settings.embedding.max_concurrent_batches,
        )?;
        override_parsed(&get, "EMBEDDING_MAX_RETRIES", &mut settings.embedding.max_retries)?;
        override_parsed(&get, "EMBEDDING_TIMEOUT_MS", &mut settings.embedding.request_timeout_ms)?;

        if let Some(path) = get("INDEX_PATH") {
            settings.index.path = PathBuf::from(path);
        }
        override_parsed(&get, "INDEX_METRIC", &mut settings.index.metric)?;

        override_parsed(&get, "TOP_K", &mut settings.retrieval.top_k)?;
        override_parsed(&get, "RERANK_CANDIDATES", &mut settings.retrieval.rerank_candidates)?;
        override_parsed(&get, "MAX_CONTEXT_CHARS", &mut settings.retrieval.max_context_chars)?;
        if let Some(value) = get("MIN_SCORE") {
            settings.retrieval.min_score = Some(parse_value("MIN_SCORE", &value)?);
        }
        override_parsed(&get, "QUERY_TIMEOUT_MS", &mut settings.retrieval.query_timeout_ms)?;

        override_parsed(
            &get,
            "BUILD_CONCURRENCY",
            &mut settings.build.max_concurrent_documents,
        )?;

        override_string(&get, "OLLAMA_URL", &mut settings.generation.ollama_url);
        override_string(&get, "OLLAMA_MODEL", &mut settings.generation.model);

        override_parsed(&get, "LOG_FORMAT", &mut settings.log_format)?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.loader.validate()?;
        self.chunking.validate()?;
        self.dedup.validate()?;
        self.embedding.validate()?;
        self.retrieval.validate()?;
        if self.build.max_concurrent_documents == 0 {
            return Err(ConfigError::invalid(
                "build",
                "max_concurrent_documents must be positive",
            ));
        }
        Ok(())
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{}{}='{}': {}", ENV_PREFIX, name, raw, e))
}

fn override_parsed<T, G>(get: &G, name: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *target = parse_value(name, &raw)?;
    }
    Ok(())
}

fn override_string<G>(get: &G, name: &str, target: &mut String)
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = get(name) {
        if !value.trim().is_empty() {
            *target = value;
        }
    }
}
