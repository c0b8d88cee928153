// Reel Recall — movie-dialogue retrieval engine.
//
// Given a (character-or-movie scope, user utterance) pair, finds the most
// relevant stored line of movie dialogue, cascading from exact lexical match
// through fuzzy match and embedding nearest-neighbor search, and falling back
// to a generative model only when no stored line is good enough.
//
// Layering:
//   atoms/   — constants, error types, plain data types. No I/O.
//   engine/  — corpus store, matchers, vector index, adapters, and the
//              retrieval policy that wires them together.
//
// The crate exposes a single upward-facing operation,
// `RetrievalEngine::resolve` — HTTP/UI layers live outside this crate.

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::types::{
    DialogueRecord, EmbeddingConfig, EngineConfig, FuzzyConfig, FuzzyScorer, GenerationConfig,
    MatchResult, MatchSource, QueryScope, Resolution, RetrievalConfig, RetryConfig,
};
pub use engine::corpus::CorpusStore;
pub use engine::embedding::{Embedder, OllamaEmbedder};
pub use engine::generate::{GeminiGenerator, Generator, RetryPolicy};
pub use engine::index::DialogueIndex;
pub use engine::policy::RetrievalEngine;
