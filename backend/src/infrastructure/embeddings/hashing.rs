/// Deterministic feature-hashing embedder
use async_trait::async_trait;

use crate::application::capabilities::{EmbedError, Embedder};
use crate::domain::value_objects::ModelIdentity;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// Bag-of-words vectors built by hashing lowercased tokens into buckets.
///
/// Needs no model download or network and always gives the same vector for
/// the same text, so it serves offline builds and tests. Texts sharing words
/// score higher under cosine similarity.
pub struct HashingEmbedder {
    identity: ModelIdentity,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(identity: ModelIdentity, dimension: usize) -> Self {
        HashingEmbedder {
            identity,
            dimension: dimension.max(1),
        }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut values = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        values
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
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
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}
