//! AI generation provider
//!
//! The planner talks to the provider through the `Generator` trait. The
//! shipped implementation speaks the OpenAI-compatible chat-completions
//! API over reqwest; `MockGenerator` exists for tests. Cost is computed
//! here from configured per-model prices so the ledger only ever sees a
//! finished number.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::config::{PricingConfig, ProviderConfig};
use crate::error::{ProviderError, Result};
use crate::types::ContentKind;

/// Token counts reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
}

/// One generation request, assembled by the planner.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub theme: String,
    pub kind: ContentKind,
    pub style_hints: Option<String>,
    /// Excerpt of the external item a reply or quote responds to.
    pub target_excerpt: Option<String>,
    pub batch: bool,
    pub use_caching: bool,
}

/// A generated candidate plus what it cost to produce.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider identifier recorded on posts and usage records.
    fn name(&self) -> &str;

    /// Model identifier recorded on posts and usage records.
    fn model(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;
}

/// Cost of one call at the configured per-million-token prices.
pub fn compute_cost(usage: TokenUsage, batch: bool, pricing: &PricingConfig) -> f64 {
    let raw = usage.input_tokens as f64 * pricing.input_per_mtok
        + usage.output_tokens as f64 * pricing.output_per_mtok
        + usage.cache_read_tokens as f64 * pricing.cache_read_per_mtok
        + usage.cache_write_tokens as f64 * pricing.cache_write_per_mtok;
    let cost = raw / 1_000_000.0;
    if batch {
        cost * pricing.batch_multiplier
    } else {
        cost
    }
}

// ============================================================================
// HTTP provider (OpenAI-compatible chat completions)
// ============================================================================

pub struct HttpGenerator {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl HttpGenerator {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt(request)},
                {"role": "user", "content": user_prompt(request)},
            ],
        });
        let url = format!("{}/v1/chat/completions", self.api_base);

        debug!(model = %self.model, kind = %request.kind, "sending generation request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        if status == 401 || status == 403 {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Authentication(text).into());
        }
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            }
            .into());
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "provider API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            }
            .into());
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let text = api_resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ProviderError::Empty)?;

        let usage = api_resp.usage.map(|u| u.into_tokens()).unwrap_or_default();

        Ok(Generation { text, usage })
    }
}

fn system_prompt(request: &GenerationRequest) -> String {
    let mut prompt = String::from(
        "You write a single social media post. Respond with the post text only, no commentary.",
    );
    if let Some(hints) = &request.style_hints {
        prompt.push_str("\nStyle: ");
        prompt.push_str(hints);
    }
    prompt
}

fn user_prompt(request: &GenerationRequest) -> String {
    match request.kind {
        ContentKind::New => format!("Write a post about: {}", request.theme),
        ContentKind::Reply => format!(
            "Write a reply to this post:\n{}",
            request.target_excerpt.as_deref().unwrap_or_default()
        ),
        ContentKind::Quote => format!(
            "Write a quote comment on this post:\n{}",
            request.target_excerpt.as_deref().unwrap_or_default()
        ),
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    prompt_tokens_details: Option<ApiPromptDetails>,
}

#[derive(Deserialize)]
struct ApiPromptDetails {
    cached_tokens: Option<i64>,
}

impl ApiUsage {
    fn into_tokens(self) -> TokenUsage {
        let cached = self
            .prompt_tokens_details
            .and_then(|d| d.cached_tokens)
            .unwrap_or(0);
        TokenUsage {
            input_tokens: self.prompt_tokens.unwrap_or(0) - cached,
            output_tokens: self.completion_tokens.unwrap_or(0),
            cache_read_tokens: cached,
            cache_write_tokens: 0,
        }
    }
}

// ============================================================================
// Mock generator for tests
// ============================================================================

/// Configurable mock generator. Counts calls and can fail on demand so
/// planner tests can exercise partial-failure paths without a network.
#[derive(Clone)]
pub struct MockGenerator {
    pub text: String,
    pub usage: TokenUsage,
    pub fail: bool,
    /// Fail only this call (1-based), succeeding before and after.
    pub fail_on_call: Option<usize>,
    pub error: Option<String>,
    pub call_count: Arc<Mutex<usize>>,
    pub requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl MockGenerator {
    pub fn success(text: &str) -> Self {
        Self {
            text: text.to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 40,
                cache_read_tokens: 0,
                cache_write_tokens: 0,
            },
            fail: false,
            fail_on_call: None,
            error: None,
            call_count: Arc::new(Mutex::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failure(error: &str) -> Self {
        Self {
            fail: true,
            error: Some(error.to_string()),
            ..Self::success("")
        }
    }

    pub fn failing_on_call(text: &str, call: usize, error: &str) -> Self {
        Self {
            fail_on_call: Some(call),
            error: Some(error.to_string()),
            ..Self::success(text)
        }
    }

    pub fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let call = {
            let mut count = self.call_count.lock().unwrap();
            *count += 1;
            *count
        };
        self.requests.lock().unwrap().push(request.clone());

        if self.fail || self.fail_on_call == Some(call) {
            let message = self
                .error
                .clone()
                .unwrap_or_else(|| "mock generation failure".to_string());
            return Err(ProviderError::Api {
                status: 500,
                message,
            }
            .into());
        }

        Ok(Generation {
            text: self.text.clone(),
            usage: self.usage,
        })
    }
}
