//! Embedding providers.
//!
//! Snippets are embedded in batches by the index pipeline. The only shipped
//! provider talks to a local Ollama server.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::EmbeddingsConfig;
use crate::error::{Error, Result};

/// Default Ollama base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Default Ollama embedding model.
pub const DEFAULT_MODEL: &str = "nomic-embed-text";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// One vector per input text, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Provider selected by configuration; `None` disables the embedding step
pub fn from_config(config: &EmbeddingsConfig) -> Result<Option<Box<dyn Embedder>>> {
    match config.provider.as_str() {
        "none" => Ok(None),
        "ollama" => Ok(Some(Box::new(OllamaEmbedder::new(&config.base_url, &config.model)?))),
        other => Err(Error::Config(format!("unknown embeddings provider '{}'", other))),
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
        })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::network("embeddings", e))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(Error::network("embeddings", format!("Ollama returned status {}", status)));
        }
        if !status.is_success() {
            return Err(Error::Config(format!(
                "Ollama rejected embedding request with status {} (model '{}')",
                status, self.model
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::network("embeddings", format!("Ollama response parse error: {}", e)))?;
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_one(text).await?);
        }
        debug!("Embedded {} snippets with {}", vectors.len(), self.model);
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IsRetryable;

    #[test]
    fn test_from_config() {
        let mut config = EmbeddingsConfig::default();
        assert!(from_config(&config).unwrap().is_none());

        config.provider = "ollama".to_string();
        assert_eq!(from_config(&config).unwrap().unwrap().name(), "ollama");

        config.provider = "magic".to_string();
        assert!(matches!(from_config(&config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_embed_batch_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embedding": [0.1, 0.2, 0.3]}"#)
            .expect(2)
            .create_async()
            .await;

        let embedder = OllamaEmbedder::new(&server.url(), DEFAULT_MODEL).unwrap();
        let vectors = embedder
            .embed_batch(&["fn a() {}".to_string(), "fn b() {}".to_string()])
            .await
            .unwrap();
        mock.assert_async().await;

        assert_eq!(vectors.len(), 2);
        assert!((vectors[1][2] - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embeddings")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let embedder = OllamaEmbedder::new(&server.url(), DEFAULT_MODEL).unwrap();
        let err = embedder.embed_batch(&["x".to_string()]).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_is_not_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/embeddings")
            .with_status(404)
            .with_body(r#"{"error":"model not found"}"#)
            .create_async()
            .await;

        let embedder = OllamaEmbedder::new(&server.url(), "missing-model").unwrap();
        let err = embedder.embed_batch(&["x".to_string()]).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("missing-model"));
    }
}
