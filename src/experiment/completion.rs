use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("still rate limited after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    #[error("completion API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion response had no message content")]
    Empty,

    #[error("OPENAI_API_KEY is not set")]
    MissingKey,
}

/// One chat completion for a single user message.
#[async_trait]
pub trait Complete: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            http: reqwest::Client::new(),
            base_url: OPENAI_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// `OPENAI_API_KEY`, plus `OPENAI_API_BASE` when set.
    pub fn from_env() -> Result<Self, CompletionError> {
        let key = std::env::var("OPENAI_API_KEY").map_err(|_| CompletionError::MissingKey)?;
        let client = Self::new(&key);
        Ok(match std::env::var("OPENAI_API_BASE") {
            Ok(base) if !base.is_empty() => client.with_base_url(&base),
            _ => client,
        })
    }
}

#[async_trait]
impl Complete for OpenAiClient {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %model, "chat request");

        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited(response.text().await?));
        }
        if !status.is_success() {
            return Err(CompletionError::Api {
                status: status.as_u16(),
                body: response.text().await?,
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(CompletionError::Empty)
    }
}

/// Capped exponential backoff for rate-limited completions.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// `base * 2^retry`, capped, plus up to half as much again of jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        let half = backoff.as_millis() as u64 / 2;
        backoff + Duration::from_millis(rand::thread_rng().gen_range(0..=half))
    }
}

/// Retry only `RateLimited`; every other outcome is returned as is.
pub async fn complete_with_retry<C: Complete + ?Sized>(
    client: &C,
    model: &str,
    prompt: &str,
    policy: &RetryPolicy,
) -> Result<String, CompletionError> {
    let mut attempt = 0;
    loop {
        match client.complete(model, prompt).await {
            Err(CompletionError::RateLimited(reason)) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(CompletionError::RateLimitExhausted { attempts: attempt });
                }
                let backoff = policy.delay_for(attempt - 1);
                warn!(
                    "Rate limited (attempt {}/{}), backing off {:.1}s: {}",
                    attempt,
                    policy.max_attempts,
                    backoff.as_secs_f64(),
                    reason
                );
                tokio::time::sleep(backoff).await;
            }
            other => return other,
        }
    }
}
