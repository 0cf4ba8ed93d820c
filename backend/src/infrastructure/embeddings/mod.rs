/// Embedding backends
mod fastembed_service;
mod hashing;
mod openai_compatible;

pub use fastembed_service::{supported_dimension, FastEmbedService};
pub use hashing::HashingEmbedder;
pub use openai_compatible::OpenAiCompatibleEmbedder;

use crate::application::capabilities::Embedder;
use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::domain::value_objects::ModelIdentity;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Construct the backend selected by `config`
pub async fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let identity = ModelIdentity::new(config.model_id.clone(), config.model_version.clone())
        .context("Invalid embedding model identity")?;
    info!("Using {:?} embedding backend for {}", config.backend, identity);

    let embedder: Arc<dyn Embedder> = match config.backend {
        EmbeddingBackend::FastEmbed => {
            let service = FastEmbedService::new(identity).await?;
            if let Some(dimension) = config.dimension {
                anyhow::ensure!(
                    dimension == service.dimension(),
                    "configured dimension {} does not match model dimension {}",
                    dimension,
                    service.dimension()
                );
            }
            Arc::new(service)
        }
        EmbeddingBackend::OpenAiCompatible => {
            let dimension = config
                .dimension
                .context("dimension is required for the OpenAI-compatible backend")?;
            Arc::new(OpenAiCompatibleEmbedder::new(
                &config.api_base,
                config.api_key.as_deref(),
                identity,
                dimension,
                config.request_timeout(),
            )?)
        }
        EmbeddingBackend::Hashing => {
            let dimension = config
                .dimension
                .context("dimension is required for the hashing backend")?;
            Arc::new(HashingEmbedder::new(identity, dimension))
        }
    };

    Ok(embedder)
}
