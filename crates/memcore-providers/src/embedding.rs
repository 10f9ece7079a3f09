//! Embedding client: batch text → fixed-dimension vector (spec §6).
//!
//! Wire shape is Voyage/Cohere-style (`input`, `input_type`,
//! `output_dimension`) rather than Anthropic's, but the request-building /
//! retry shape is the same one `AnthropicProvider`/`ProviderRouter` use.
//! Empty strings are filtered out before the request and reinserted as
//! zero vectors at their original index afterward, per spec §6.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use memcore_core::config::EMBEDDING_DIMS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Document,
    Query,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, inputs: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>>;
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_retries: u32,
    retry_delay_ms: u64,
    /// Tokens billed across this instance's lifetime. Deliberately a plain
    /// field, not a process-wide static — two engines running concurrently
    /// must not share a counter (spec §5).
    usage_tokens: AtomicU64,
}

impl HttpEmbeddingProvider {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        max_retries: u32,
        retry_delay_ms: u64,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key,
            base_url,
            model,
            max_retries,
            retry_delay_ms,
            usage_tokens: AtomicU64::new(0),
        }
    }

    /// Total tokens billed by this instance so far.
    pub fn usage_tokens(&self) -> u64 {
        self.usage_tokens.load(Ordering::Relaxed)
    }

    async fn call(&self, inputs: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "input": inputs,
            "model": self.model,
            "input_type": input_type,
            "output_dimension": EMBEDDING_DIMS,
        });

        debug!(model = %self.model, n = inputs.len(), "sending embedding request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "embedding API error");
            return Err(ProviderError::Api { status, message: text });
        }

        let api_resp: ApiResponse = resp.json().await.map_err(|e| ProviderError::Parse(e.to_string()))?;
        self.usage_tokens.fetch_add(api_resp.usage.total_tokens, Ordering::Relaxed);
        let mut items = api_resp.data;
        items.sort_by_key(|d| d.index);
        Ok(items.into_iter().map(|d| d.embedding).collect())
    }

    /// Call `self.call`, retrying 5xx/429 with backoff; a 429 doubles the
    /// delay on each subsequent attempt instead of the linear multiplier
    /// the chat client uses (spec §5: "doubled delay on 429").
    async fn call_with_retry(&self, inputs: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        let mut delay = self.retry_delay_ms;
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            match self.call(inputs, input_type).await {
                Ok(v) => return Ok(v),
                Err(ProviderError::RateLimited { retry_after_ms }) => {
                    warn!(attempt, retry_after_ms, "embedding rate limited");
                    last_err = Some(ProviderError::RateLimited { retry_after_ms });
                    if attempt < self.max_retries {
                        tokio::time::sleep(std::time::Duration::from_millis(retry_after_ms.max(delay))).await;
                        delay *= 2;
                    }
                }
                Err(e @ ProviderError::Api { status, .. }) if status >= 500 => {
                    warn!(attempt, err = %e, "embedding server error");
                    last_err = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                        delay *= 2;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Unavailable("embedding.embed_batch".to_string())))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, inputs: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        let mut non_empty: Vec<&String> = Vec::with_capacity(inputs.len());
        let mut positions: Vec<usize> = Vec::with_capacity(inputs.len());
        for (i, s) in inputs.iter().enumerate() {
            if !s.trim().is_empty() {
                non_empty.push(s);
                positions.push(i);
            }
        }

        let mut out = vec![vec![0.0f32; EMBEDDING_DIMS]; inputs.len()];
        if non_empty.is_empty() {
            return Ok(out);
        }

        let owned: Vec<String> = non_empty.into_iter().cloned().collect();
        let embedded = self.call_with_retry(&owned, input_type).await?;
        for (slot, vector) in positions.into_iter().zip(embedded.into_iter()) {
            out[slot] = vector;
        }
        Ok(out)
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    data: Vec<EmbeddingDatum>,
    usage: UsageField,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct UsageField {
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_response_deserializes_and_sorts_by_index() {
        let raw = r#"{"data":[{"embedding":[0.2],"index":1},{"embedding":[0.1],"index":0}],"usage":{"total_tokens":4}}"#;
        let resp: ApiResponse = serde_json::from_str(raw).unwrap();
        let mut items = resp.data;
        items.sort_by_key(|d| d.index);
        assert_eq!(items[0].embedding, vec![0.1]);
        assert_eq!(items[1].embedding, vec![0.2]);
    }
}
