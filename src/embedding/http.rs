//! HTTP embedding providers: Ollama and OpenAI-compatible endpoints.

use super::{EmbeddingClient, EmbeddingClientError, check_dimensions};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

fn http_client(agent: &str) -> Client {
    Client::builder()
        .user_agent(agent)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|error| {
            tracing::warn!(error = %error, "Falling back to default HTTP client");
            Client::new()
        })
}

async fn read_success(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, EmbeddingClientError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(EmbeddingClientError::ProviderUnavailable(format!(
            "endpoint {endpoint} returned 404"
        ))),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(EmbeddingClientError::GenerationFailed(format!(
                "{endpoint} returned {status}: {body}"
            )))
        }
    }
}

/// Client for Ollama's `/api/embed` endpoint.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingClient {
    /// Build a client; `base_url` defaults to the local Ollama port.
    pub fn new(base_url: Option<&str>, model: String, dimension: usize) -> Self {
        Self {
            http: http_client("docvec/embed"),
            base_url: base_url.unwrap_or(DEFAULT_OLLAMA_URL).to_string(),
            model,
            dimension,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let endpoint = self.endpoint();
        tracing::debug!(model = %self.model, texts = texts.len(), "Requesting Ollama embeddings");
        let response = self
            .http
            .post(&endpoint)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        let body: OllamaEmbedResponse = read_success(response, &endpoint)
            .await?
            .json()
            .await
            .map_err(|error| {
                EmbeddingClientError::InvalidResponse(format!(
                    "failed to decode Ollama response: {error}"
                ))
            })?;

        check_dimensions(&body.embeddings, self.dimension)?;
        Ok(body.embeddings)
    }
}

/// Client for OpenAI-compatible `/v1/embeddings` endpoints.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingClient {
    /// Build a client; `base_url` defaults to the public OpenAI API.
    pub fn new(
        base_url: Option<&str>,
        api_key: Option<String>,
        model: String,
        dimension: usize,
    ) -> Self {
        Self {
            http: http_client("docvec/embed"),
            base_url: base_url.unwrap_or(DEFAULT_OPENAI_URL).to_string(),
            api_key,
            model,
            dimension,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let endpoint = self.endpoint();
        tracing::debug!(model = %self.model, texts = texts.len(), "Requesting OpenAI embeddings");
        let mut request = self
            .http
            .post(&endpoint)
            .json(&json!({ "model": self.model, "input": texts }));
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await.map_err(|error| {
            EmbeddingClientError::ProviderUnavailable(format!(
                "failed to reach {}: {error}",
                self.base_url
            ))
        })?;

        let mut body: OpenAiEmbedResponse = read_success(response, &endpoint)
            .await?
            .json()
            .await
            .map_err(|error| {
                EmbeddingClientError::InvalidResponse(format!(
                    "failed to decode embeddings response: {error}"
                ))
            })?;

        // Entries carry their input index; order is not guaranteed on the wire.
        body.data.sort_by_key(|entry| entry.index);
        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|entry| entry.embedding).collect();
        check_dimensions(&vectors, self.dimension)?;
        Ok(vectors)
    }
}
