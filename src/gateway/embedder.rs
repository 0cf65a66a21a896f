//! Embedder logical client (spec §4.4). Batching loop grounded on
//! `examples/other_examples/021be95f_..._embedder.rs.rs`'s
//! `for batch_start in (0..len).step_by(EMBED_BATCH_SIZE)` shape — here the
//! gateway itself makes exactly one HTTP call per batch (performance
//! contract in spec §4.4), and batching across more than one HTTP-sized
//! batch is the caller's (C10 Embedder's) responsibility.

use crate::error::{ConstructionRagError, ModelError, Result};
use crate::gateway::{classify_http_error, retry_transient, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbedderClient: Send + Sync {
    /// Embeds `texts` in exactly one HTTP call regardless of its length
    /// (spec §4.4 performance contract). Returns one vector per input text,
    /// in the same order.
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct WireResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct HttpEmbedderClient {
    http: reqwest::Client,
    endpoint: String,
    retry_policy: RetryPolicy,
}

impl HttpEmbedderClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            endpoint: endpoint.into(),
            retry_policy: RetryPolicy::default(),
        }
    }

    async fn call_once(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        let started = Instant::now();

        let response = self
            .http
            .post(&self.endpoint)
            .json(&WireRequest { model, input: texts })
            .send()
            .await
            .map_err(|e| classify_http_error("embedder", e.status().map(|s| s.as_u16()), &e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error("embedder", Some(status.as_u16()), &body));
        }

        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| ConstructionRagError::Model(ModelError::InvalidResponse {
                service: "embedder",
                reason: e.to_string(),
            }))?;

        if body.embeddings.len() != texts.len() {
            return Err(ConstructionRagError::Model(ModelError::InvalidResponse {
                service: "embedder",
                reason: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    body.embeddings.len()
                ),
            }));
        }

        debug!(
            model,
            batch_size = texts.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "embedder call completed"
        );

        Ok(body.embeddings)
    }
}

#[async_trait]
impl EmbedderClient for HttpEmbedderClient {
    async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        retry_transient("embedder", self.retry_policy, || self.call_once(texts, model)).await
    }
}
