//! Embedding client abstraction and adapters.
//!
//! Every client returns one vector per input text, in input order. Callers compare lengths
//! themselves; a short or long response is not treated as an error here. A vector of the wrong
//! dimension is.

mod http;

pub use http::{OllamaEmbeddingClient, OpenAiEmbeddingClient};

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// A returned vector does not have the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Dimension actually returned.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied chunk of text.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Deterministic embedding client that hashes bytes into vector slots.
///
/// Useful for local runs without a model server; similar texts do not end up near each other.
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    /// Construct a client producing vectors of `dimension` components.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            embedding[idx % dimension] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        tracing::debug!(
            dimension = self.dimension,
            texts = texts.len(),
            "Generating hash embeddings"
        );

        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }
}

/// Build an embedding client for the configured provider.
pub fn build_embedding_client(config: &Config) -> Box<dyn EmbeddingClient> {
    let dimension = config.embedding_dimension;
    let model = config.embedding_model.clone();
    match config.embedding_provider {
        EmbeddingProvider::Hash => Box::new(HashEmbeddingClient::new(dimension)),
        EmbeddingProvider::Ollama => Box::new(OllamaEmbeddingClient::new(
            config.ollama_url.as_deref(),
            model,
            dimension,
        )),
        EmbeddingProvider::OpenAI => Box::new(OpenAiEmbeddingClient::new(
            config.openai_url.as_deref(),
            config.openai_api_key.clone(),
            model,
            dimension,
        )),
    }
}

/// Reject any vector whose length differs from `expected`.
pub(crate) fn check_dimensions(
    vectors: &[Vec<f32>],
    expected: usize,
) -> Result<(), EmbeddingClientError> {
    match vectors.iter().find(|vector| vector.len() != expected) {
        Some(vector) => Err(EmbeddingClientError::DimensionMismatch {
            expected,
            actual: vector.len(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_client_is_deterministic_and_normalized() {
        let client = HashEmbeddingClient::new(8);
        let first = client
            .generate_embeddings(vec!["alpha".into(), "beta".into()])
            .await
            .expect("embeddings");
        let second = client
            .generate_embeddings(vec!["alpha".into()])
            .await
            .expect("embeddings");

        assert_eq!(first.len(), 2);
        assert_eq!(first[0], second[0]);
        let norm: f32 = first[1].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn hash_client_rejects_zero_dimension() {
        let error = HashEmbeddingClient::new(0)
            .generate_embeddings(vec!["x".into()])
            .await
            .unwrap_err();
        assert!(matches!(error, EmbeddingClientError::GenerationFailed(_)));
    }

    #[test]
    fn dimension_check_reports_first_offender() {
        let error = check_dimensions(&[vec![0.0; 3], vec![0.0; 2]], 3).unwrap_err();
        assert!(matches!(
            error,
            EmbeddingClientError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(check_dimensions(&[], 3).is_ok());
    }
}
