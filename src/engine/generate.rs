// ── Generative Fallback Adapter ────────────────────────────────────────────
// Last stage of the cascade: ask an external model to answer in character
// when no stored line is good enough. Injected into the retrieval engine
// behind the `Generator` trait so tests use a fake.
//
// Transient HTTP failures are retried on a bounded exponential-backoff
// schedule. The schedule itself is a plain value (`RetryPolicy`) so its
// shape is testable without sleeping.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{GenerationConfig, RetryConfig};
use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Produce an in-character reply for `subject` (a character or movie name)
/// responding to `utterance`. Fails only after the adapter's own retry
/// budget is spent; the retrieval policy maps that failure to a static
/// apology, never to a caller-visible error.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, subject: &str, utterance: &str) -> EngineResult<String>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Retry policy
// ═══════════════════════════════════════════════════════════════════════════

/// Bounded exponential backoff: attempt n (0-based) sleeps
/// `initial_delay * 2^n` before retrying.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
        }
    }

    /// Delay to sleep after failed attempt `attempt` (0-based), or `None`
    /// when the budget is spent and the failure is final.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts {
            return None;
        }
        Some(self.initial_delay * 2u32.saturating_pow(attempt))
    }
}

/// Check if an HTTP status code should be retried.
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 529)
}

// ═══════════════════════════════════════════════════════════════════════════
// Gemini client
// ═══════════════════════════════════════════════════════════════════════════

/// Client for the Gemini `generateContent` API.
pub struct GeminiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    retry: RetryPolicy,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig) -> Self {
        GeminiGenerator {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }

    /// Stay-in-character prompt. The model is told it IS the subject and is
    /// replying to a line addressed to it.
    fn build_prompt(subject: &str, utterance: &str) -> String {
        format!(
            "Act exactly like {subject} from the movie script. \
             Stay in character and respond naturally, as if you were in the scene. \
             Given this line from another character: \"{utterance}\", \
             how would {subject} realistically reply based on their personality \
             and speaking style?"
        )
    }

    /// One non-streaming generateContent call.
    /// Returns Err((retryable, message)) so the retry loop can decide.
    async fn call_once(&self, prompt: &str) -> Result<String, (bool, String)> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }]
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| (true, format!("request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err((is_retryable_status(status.as_u16()), format!("{} — {}", status, text)));
        }

        let v: Value = resp.json().await.map_err(|e| (false, format!("bad JSON: {}", e)))?;
        let text = v["candidates"]
            .get(0)
            .and_then(|c| c["content"]["parts"].get(0))
            .and_then(|p| p["text"].as_str())
            .map(|s| s.trim().to_string());

        match text {
            Some(t) if !t.is_empty() => Ok(t),
            _ => Err((false, "response carried no candidate text".to_string())),
        }
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, subject: &str, utterance: &str) -> EngineResult<String> {
        let prompt = Self::build_prompt(subject, utterance);

        let mut attempt = 0;
        loop {
            match self.call_once(&prompt).await {
                Ok(text) => {
                    info!("[generate] Reply for '{}' on attempt {}", subject, attempt + 1);
                    return Ok(text);
                }
                Err((retryable, message)) => {
                    let delay = if retryable { self.retry.delay_after(attempt) } else { None };
                    match delay {
                        Some(d) => {
                            warn!(
                                "[generate] Attempt {} failed ({}), retrying in {:?}",
                                attempt + 1,
                                message,
                                d
                            );
                            tokio::time::sleep(d).await;
                            attempt += 1;
                        }
                        None => {
                            return Err(EngineError::generation(
                                "gemini",
                                format!("attempt {}: {}", attempt + 1, message),
                            ));
                        }
                    }
                }
            }
        }
    }
}
