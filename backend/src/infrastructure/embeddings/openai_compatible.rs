/// Embedder for any server speaking the OpenAI `/embeddings` protocol
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::application::capabilities::{EmbedError, Embedder};
use crate::domain::value_objects::ModelIdentity;

pub struct OpenAiCompatibleEmbedder {
    client: Client,
    endpoint: String,
    identity: ModelIdentity,
    dimension: usize,
    timeout: Duration,
}

impl OpenAiCompatibleEmbedder {
    pub fn new(
        api_base: &str,
        api_key: Option<&str>,
        identity: ModelIdentity,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(dimension > 0, "embedding dimension must be positive");

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", key)).context("invalid API key")?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build embeddings HTTP client")?;

        Ok(OpenAiCompatibleEmbedder {
            client,
            endpoint: format!("{}/embeddings", api_base.trim_end_matches('/')),
            identity,
            dimension,
            timeout,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Restore input order; the protocol allows data in any order
fn into_ordered(mut response: EmbeddingResponse, expected: usize) -> Result<Vec<Vec<f32>>, EmbedError> {
    response.data.sort_by_key(|d| d.index);
    let in_order = response
        .data
        .iter()
        .enumerate()
        .all(|(i, d)| d.index == i);
    if response.data.len() != expected || !in_order {
        return Err(EmbedError::MalformedResponse(format!(
            "{} embeddings for {} inputs",
            response.data.len(),
            expected
        )));
    }
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl Embedder for OpenAiCompatibleEmbedder {
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

        debug!("POST {} with {} inputs", self.endpoint, texts.len());
        let request = EmbeddingRequest {
            model: self.identity.id(),
            input: texts,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbedError::Timeout(self.timeout)
                } else {
                    EmbedError::Backend(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Backend(format!(
                "embeddings request failed ({}): {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::MalformedResponse(e.to_string()))?;
        into_ordered(parsed, texts.len())
    }
}
