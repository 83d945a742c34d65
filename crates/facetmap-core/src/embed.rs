//! Batch embedding with shape checks on the provider's answer.

use std::sync::Arc;

use thiserror::Error;

use crate::provider::{EmbeddingProvider, ProviderError};

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding {index} has dimension {got}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        got: usize,
    },
    #[error("embedding {index} is empty")]
    EmptyVector { index: usize },
}

pub struct EmbeddingProducer {
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingProducer {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider }
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Embed `texts` in a single request. `result[i]` belongs to `texts[i]`.
    ///
    /// An empty batch returns immediately without touching the provider.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.provider.embed(texts).await?;
        check_shape(texts.len(), &vectors)?;
        tracing::debug!(
            model = self.provider.model(),
            count = vectors.len(),
            dimension = vectors[0].len(),
            "embedded batch"
        );
        Ok(vectors)
    }
}

fn check_shape(expected: usize, vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            got: vectors.len(),
        });
    }
    let dimension = vectors.first().map(Vec::len).unwrap_or(0);
    for (index, v) in vectors.iter().enumerate() {
        if v.is_empty() {
            return Err(EmbeddingError::EmptyVector { index });
        }
        if v.len() != dimension {
            return Err(EmbeddingError::DimensionMismatch {
                index,
                expected: dimension,
                got: v.len(),
            });
        }
    }
    Ok(())
}
