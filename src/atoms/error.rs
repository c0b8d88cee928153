// ── Atoms: Error Types ─────────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Network, Generation…).
//   • The `#[from]` attribute wires std/external error conversions.
//   • "No match found" and "index empty" are NOT errors — they are normal
//     cascade outcomes modeled as `Option`/skips in the retrieval policy.
//   • Only `Input` is ever surfaced to the caller of `resolve`.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A required input was missing or empty. The one user-visible error.
    #[error("Input error: {0}")]
    Input(String),

    /// Embedding service failure (every endpoint exhausted).
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Generative adapter failure (service unreachable, unusable payload).
    #[error("Generation error: {provider}: {message}")]
    Generation { provider: String, message: String },

    /// Internal invariant broken (vector/metadata join out of sync).
    /// Logged as a defect; never allowed to crash the request path.
    #[error("Consistency error: {0}")]
    Consistency(String),

    /// Engine configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create an input error.
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    /// Create a generation error with provider name and message.
    pub fn generation(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation { provider: provider.into(), message: message.into() }
    }

    /// Create a consistency error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency(message.into())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;
