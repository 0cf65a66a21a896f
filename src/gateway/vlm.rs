//! VLM logical client (spec §4.4, §4.8) plus the process-wide caption
//! cache keyed by (image content hash, prompt hash) (spec §5, §9). The
//! cache's key/TTL-free, read/write-without-locking shape is grounded on
//! `cache.rs::LlmCache` (SQLite-backed key/value cache with LRU eviction),
//! simplified here to an in-process map since captions are cheap to
//! recompute and the spec only asks for "safe to share ... last-write-wins",
//! not durability across restarts.

use crate::error::{ConstructionRagError, ModelError, Result};
use crate::gateway::{classify_http_error, retry_transient, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VlmClient: Send + Sync {
    async fn caption(&self, image_bytes: &[u8], prompt: &str, model: &str) -> Result<String>;
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    image_base64: String,
}

#[derive(Deserialize)]
struct WireResponse {
    caption: String,
}

/// `(image content hash, prompt hash)`.
type CacheKey = (String, String);

#[derive(Default)]
pub struct CaptionCache {
    entries: RwLock<HashMap<CacheKey, String>>,
}

impl CaptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_for(image_bytes: &[u8], prompt: &str) -> CacheKey {
        (hex_sha256(image_bytes), hex_sha256(prompt.as_bytes()))
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        self.entries.read().unwrap().get(key).cloned()
    }

    /// Last-write-wins: concurrent captioners of the same image/prompt pair
    /// may race here, but both produce an equivalent caption, so neither
    /// write is wrong (spec §5).
    pub fn put(&self, key: CacheKey, caption: String) {
        self.entries.write().unwrap().insert(key, caption);
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct HttpVlmClient {
    http: reqwest::Client,
    endpoint: String,
    retry_policy: RetryPolicy,
    cache: CaptionCache,
}

impl HttpVlmClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build HTTP client"),
            endpoint: endpoint.into(),
            retry_policy: RetryPolicy::default(),
            cache: CaptionCache::new(),
        }
    }

    async fn call_once(&self, image_bytes: &[u8], prompt: &str, model: &str) -> Result<String> {
        use base64::Engine;
        let started = Instant::now();

        let response = self
            .http
            .post(&self.endpoint)
            .json(&WireRequest {
                model,
                prompt,
                image_base64: base64::engine::general_purpose::STANDARD.encode(image_bytes),
            })
            .send()
            .await
            .map_err(|e| classify_http_error("vlm", e.status().map(|s| s.as_u16()), &e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error("vlm", Some(status.as_u16()), &body));
        }

        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| ConstructionRagError::Model(ModelError::InvalidResponse {
                service: "vlm",
                reason: e.to_string(),
            }))?;

        debug!(
            model,
            latency_ms = started.elapsed().as_millis() as u64,
            "vlm call completed"
        );

        Ok(body.caption)
    }
}

#[async_trait]
impl VlmClient for HttpVlmClient {
    async fn caption(&self, image_bytes: &[u8], prompt: &str, model: &str) -> Result<String> {
        let key = CaptionCache::key_for(image_bytes, prompt);
        if let Some(cached) = self.cache.get(&key) {
            debug!("vlm caption cache hit");
            return Ok(cached);
        }

        let caption = retry_transient("vlm", self.retry_policy, || {
            self.call_once(image_bytes, prompt, model)
        })
        .await?;

        self.cache.put(key, caption.clone());
        Ok(caption)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_for_same_inputs() {
        let k1 = CaptionCache::key_for(b"image bytes", "describe this table");
        let k2 = CaptionCache::key_for(b"image bytes", "describe this table");
        assert_eq!(k1, k2);
    }

    #[test]
    fn cache_key_differs_for_different_prompts() {
        let k1 = CaptionCache::key_for(b"image bytes", "prompt a");
        let k2 = CaptionCache::key_for(b"image bytes", "prompt b");
        assert_ne!(k1, k2);
    }

    #[test]
    fn cache_put_then_get() {
        let cache = CaptionCache::new();
        let key = CaptionCache::key_for(b"bytes", "prompt");
        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), "a caption".to_string());
        assert_eq!(cache.get(&key), Some("a caption".to_string()));
    }
}
