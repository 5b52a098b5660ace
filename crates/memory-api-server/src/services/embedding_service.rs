use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::config::EmbeddingConfig;

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    content: String,
    input: String, // llama.cpp reads `content`, OpenAI-style servers read `input`
}

#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    dimension: usize,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url,
            dimension: config.dimension,
        }
    }

    /// Generate an embedding for a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            content: text.to_string(),
            input: text.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/embedding", self.base_url))
            .json(&request)
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = Self::parse_embedding(&json_value)?;

        if embedding.len() != self.dimension {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            );
        }

        Ok(embedding)
    }

    /// Accepts llama.cpp (`{"embedding": [...]}`) and OpenAI
    /// (`{"data": [{"embedding": [...]}]}`) response shapes.
    fn parse_embedding(value: &serde_json::Value) -> Result<Vec<f32>> {
        let array = if value["embedding"].is_array() {
            value["embedding"].as_array().unwrap()
        } else if value["data"].is_array() {
            value["data"]
                .get(0)
                .and_then(|d| d["embedding"].as_array())
                .ok_or_else(|| anyhow::anyhow!("empty data array in embedding response"))?
        } else {
            anyhow::bail!("Unrecognized embedding response format: {}", value);
        };

        let embedding: Vec<f32> = array
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if embedding.is_empty() {
            anyhow::bail!("Generated embedding is empty");
        }

        Ok(embedding)
    }
}
