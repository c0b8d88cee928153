// ── Atoms: Data Types ──────────────────────────────────────────────────────
// Plain records and configuration structs shared across the engine.
// Conventions:
//   • Every config struct derives serde with `#[serde(default)]` and carries
//     an explicit `Default` impl so partial config files always load.
//   • Records are dumb data — all behavior lives in engine/.

use crate::atoms::constants::*;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════
// Records
// ═══════════════════════════════════════════════════════════════════════════

/// One stored line of dialogue: who said what, in which movie.
/// `line_text` is always normalized (whitespace-collapsed, tags stripped)
/// and non-empty — the corpus store enforces this on every write path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueRecord {
    pub movie_title: String,
    pub character_name: String,
    pub line_text: String,
}

/// Which cascade stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Exact,
    Fuzzy,
    Vector,
    Generated,
}

impl MatchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchSource::Exact => "exact",
            MatchSource::Fuzzy => "fuzzy",
            MatchSource::Vector => "vector",
            MatchSource::Generated => "generated",
        }
    }
}

/// A single candidate produced by one cascade stage.
/// `score` is stage-native: 100 for exact, 0–100 for fuzzy, raw squared-L2
/// distance for vector (lower is better there).
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub line_text: String,
    pub movie_title: String,
    pub character_name: String,
    pub score: f64,
    pub source: MatchSource,
}

/// The engine's entire upward-facing contract: the answer to one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// The text to show the user — a stored line or generated reply.
    pub text: String,
    pub source: MatchSource,
    /// Stage-native confidence; `None` for generated replies.
    pub confidence: Option<f64>,
    /// Where the line came from, when it came from the corpus.
    pub movie_title: Option<String>,
    pub character_name: Option<String>,
}

/// What the query is scoped to. At least one of the two must be set;
/// the retrieval policy rejects an empty scope as an input error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryScope {
    pub character: Option<String>,
    pub movie: Option<String>,
}

impl QueryScope {
    pub fn character(name: impl Into<String>) -> Self {
        QueryScope { character: Some(name.into()), movie: None }
    }

    pub fn movie(title: impl Into<String>) -> Self {
        QueryScope { character: None, movie: Some(title.into()) }
    }

    /// The identity string handed to the generation prompt:
    /// the character when known, otherwise the movie.
    pub fn subject(&self) -> Option<&str> {
        self.character
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.movie.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Which string-similarity scorer the fuzzy stage uses.
/// `PartialRatio` scores the best-matching window of the longer string
/// (robust when the utterance is a fragment of a long line); `SimpleRatio`
/// compares the two strings whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzyScorer {
    PartialRatio,
    SimpleRatio,
}

impl Default for FuzzyScorer {
    fn default() -> Self {
        FuzzyScorer::PartialRatio
    }
}

/// Fuzzy-stage tuning. Threshold and scorer are deliberately both config —
/// deployments disagree on the right pair, so neither is hard-coded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuzzyConfig {
    /// Score (0–100) a line must strictly exceed to count as a fuzzy hit.
    pub threshold: f64,
    pub scorer: FuzzyScorer,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self { threshold: DEFAULT_FUZZY_THRESHOLD, scorer: FuzzyScorer::default() }
    }
}

/// Retrieval-policy tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub fuzzy: FuzzyConfig,
    /// Maximum squared-L2 distance for a vector hit to be trusted.
    pub max_vector_distance: f32,
    /// Persist successful generated replies back into the corpus and index
    /// so the next identical query resolves lexically.
    pub cache_generated: bool,
    /// Wall-clock budget for the generation stage, in seconds.
    pub generation_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            fuzzy: FuzzyConfig::default(),
            max_vector_distance: DEFAULT_MAX_VECTOR_DISTANCE,
            cache_generated: true,
            generation_timeout_secs: DEFAULT_GENERATION_TIMEOUT_SECS,
        }
    }
}

/// Embedding client endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of an Ollama or OpenAI-compatible embedding server.
    pub base_url: String,
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_EMBEDDING_BASE_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

/// Bounded-retry schedule for the generation adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first (so 3 = 1 try + 2 retries).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each subsequent retry.
    pub initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_RETRIES, initial_delay_ms: DEFAULT_INITIAL_RETRY_DELAY_MS }
    }
}

/// Generation adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    /// API key for the generation service. Never logged.
    pub api_key: String,
    pub retry: RetryConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: DEFAULT_GENERATION_MODEL.to_string(),
            api_key: String::new(),
            retry: RetryConfig::default(),
        }
    }
}

/// Top-level engine configuration, one field per concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}
