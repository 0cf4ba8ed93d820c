/// FastEmbed backend for local embedding generation
use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::application::capabilities::{EmbedError, Embedder};
use crate::domain::value_objects::ModelIdentity;

/// Local models this backend can serve, with their output dimension
const SUPPORTED_MODELS: &[(&str, usize)] = &[
    ("sentence-transformers/all-MiniLM-L6-v2", 384),
    ("BAAI/bge-small-en-v1.5", 384),
    ("BAAI/bge-base-en-v1.5", 768),
];

fn fastembed_model(model_id: &str) -> Option<FastEmbedModel> {
    match model_id {
        "sentence-transformers/all-MiniLM-L6-v2" => Some(FastEmbedModel::AllMiniLML6V2),
        "BAAI/bge-small-en-v1.5" => Some(FastEmbedModel::BGESmallENV15),
        "BAAI/bge-base-en-v1.5" => Some(FastEmbedModel::BGEBaseENV15),
        _ => None,
    }
}

/// Output dimension of a supported local model
pub fn supported_dimension(model_id: &str) -> Option<usize> {
    SUPPORTED_MODELS
        .iter()
        .find(|(id, _)| *id == model_id)
        .map(|(_, dim)| *dim)
}

/// Embedder backed by an ONNX model running in-process
pub struct FastEmbedService {
    model: Arc<Mutex<TextEmbedding>>,
    identity: ModelIdentity,
    dimension: usize,
}

impl FastEmbedService {
    /// Load (downloading on first use) the model named by `identity`
    pub async fn new(identity: ModelIdentity) -> Result<Self> {
        info!("Initializing FastEmbed service with model: {}", identity);

        let variant = fastembed_model(identity.id()).with_context(|| {
            format!(
                "Model '{}' is not available locally; supported: {}",
                identity.id(),
                SUPPORTED_MODELS
                    .iter()
                    .map(|(id, _)| *id)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?;
        let dimension = supported_dimension(identity.id())
            .context("Model dimension unknown")?;

        let model = TextEmbedding::try_new(
            InitOptions::new(variant).with_show_download_progress(true),
        )
        .context("Failed to initialize FastEmbed model")?;

        info!("FastEmbed model initialized successfully");

        Ok(FastEmbedService {
            model: Arc::new(Mutex::new(model)),
            identity,
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedService {
    fn model(&self) -> &ModelIdentity {
        &self.identity
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(
        &self,
        texts: &[String],
        model: &ModelIdentity,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        self.check_model(model)?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for batch of {} texts", texts.len());
        let mut model = self.model.lock().await;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedError::Backend(e.to_string()))
    }
}
