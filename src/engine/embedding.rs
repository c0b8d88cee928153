// ── Embedding Adapter ──────────────────────────────────────────────────────
// Turns text into fixed-dimension vectors via an external embedding server.
// The HTTP client is constructed once at startup and injected into the
// retrieval engine behind the `Embedder` trait, so tests swap in a fake.
//
// `OllamaEmbedder` tries the current Ollama endpoint first, then the legacy
// one, then an OpenAI-compatible endpoint — the same server often speaks
// more than one of these depending on version.

use crate::atoms::constants::EMBED_REQUEST_TIMEOUT_SECS;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::EmbeddingConfig;
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Text → vector. Deterministic for a given model version: the same text
/// always embeds to the same vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;

    /// Model identifier, for logs and index-compatibility checks.
    fn model(&self) -> &str;
}

/// Embedding client for Ollama or OpenAI-compatible servers.
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        OllamaEmbedder {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    /// Ollama current API: POST /api/embed { model, input } → { embeddings: [[f32…]] }.
    /// Some versions return singular { embedding: [f32…] } on the same route.
    async fn embed_current(&self, text: &str) -> Result<Vec<f32>, String> {
        let url = format!("{}/api/embed", self.base_url);
        let body = json!({ "model": self.model, "input": text });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(EMBED_REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("{} — {}", status, text));
        }

        let v: Value = resp.json().await.map_err(|e| format!("bad JSON: {}", e))?;
        if let Some(first) = v["embeddings"].as_array().and_then(|e| e.first()) {
            if let Some(vec) = parse_vector(first) {
                return Ok(vec);
            }
        }
        if let Some(vec) = parse_vector(&v["embedding"]) {
            return Ok(vec);
        }
        Err("response carried no embedding".to_string())
    }

    /// Legacy Ollama API: POST /api/embeddings { model, prompt } → { embedding: [f32…] }.
    async fn embed_legacy(&self, text: &str) -> Result<Vec<f32>, String> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = json!({ "model": self.model, "prompt": text });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(EMBED_REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("{}", resp.status()));
        }
        let v: Value = resp.json().await.map_err(|e| format!("bad JSON: {}", e))?;
        parse_vector(&v["embedding"]).ok_or_else(|| "response carried no embedding".to_string())
    }

    /// OpenAI-compatible API: POST /v1/embeddings { model, input } →
    /// { data: [{ embedding: [f32…] }] }.
    async fn embed_openai(&self, text: &str) -> Result<Vec<f32>, String> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({ "model": self.model, "input": text });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(Duration::from_secs(EMBED_REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("{}", resp.status()));
        }
        let v: Value = resp.json().await.map_err(|e| format!("bad JSON: {}", e))?;
        v["data"]
            .get(0)
            .and_then(|d| parse_vector(&d["embedding"]))
            .ok_or_else(|| "response carried no embedding".to_string())
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    /// Try the endpoint ladder; each failure's detail is carried into the
    /// final error so a misconfigured server is diagnosable from one line.
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let current_err = match self.embed_current(text).await {
            Ok(vec) => return Ok(vec),
            Err(e) => e,
        };
        info!("[embed] /api/embed unavailable ({}), trying legacy endpoint", current_err);

        let legacy_err = match self.embed_legacy(text).await {
            Ok(vec) => return Ok(vec),
            Err(e) => e,
        };

        match self.embed_openai(text).await {
            Ok(vec) => Ok(vec),
            Err(openai_err) => Err(EngineError::Embedding(format!(
                "all endpoints failed. /api/embed: {} | /api/embeddings: {} | /v1/embeddings: {}",
                current_err, legacy_err, openai_err
            ))),
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn parse_vector(value: &Value) -> Option<Vec<f32>> {
    let arr = value.as_array()?;
    let vec: Vec<f32> = arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect();
    if vec.is_empty() {
        None
    } else {
        Some(vec)
    }
}
