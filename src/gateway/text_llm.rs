//! Text LLM logical client (spec §4.4). HTTP client construction grounded
//! on `llm.rs::OllamaClient::new` (a `reqwest::Client` built once with a
//! configured timeout).

use crate::config::Language;
use crate::error::{ConstructionRagError, ModelError, Result};
use crate::gateway::{classify_http_error, retry_transient, RetryPolicy};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    pub max_tokens: u32,
    pub language_hint: Language,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextLlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResponse>;
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    language: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    text: String,
    #[serde(default)]
    tokens_used: Option<u32>,
}

pub struct HttpTextLlmClient {
    http: reqwest::Client,
    endpoint: String,
    retry_policy: RetryPolicy,
}

impl HttpTextLlmClient {
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

    async fn call_once(&self, request: &CompletionRequest<'_>) -> Result<CompletionResponse> {
        let started = Instant::now();
        let language = match request.language_hint {
            Language::English => "english",
            Language::Danish => "danish",
        };

        // Prompt bodies are never logged above `trace` (spec §4.4).
        trace!(prompt = request.prompt, "sending text-llm prompt");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&WireRequest {
                model: request.model,
                prompt: request.prompt,
                max_tokens: request.max_tokens,
                language,
            })
            .send()
            .await
            .map_err(|e| classify_http_error("text_llm", e.status().map(|s| s.as_u16()), &e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_error("text_llm", Some(status.as_u16()), &body));
        }

        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| ConstructionRagError::Model(ModelError::InvalidResponse {
                service: "text_llm",
                reason: e.to_string(),
            }))?;

        debug!(
            model = request.model,
            latency_ms = started.elapsed().as_millis() as u64,
            tokens_used = body.tokens_used,
            "text-llm call completed"
        );

        Ok(CompletionResponse {
            text: body.text,
            tokens_used: body.tokens_used,
        })
    }
}

#[async_trait]
impl TextLlmClient for HttpTextLlmClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResponse> {
        retry_transient("text_llm", self.retry_policy, || self.call_once(&request)).await
    }
}
