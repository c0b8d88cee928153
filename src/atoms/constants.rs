// ── Atoms: Constants ───────────────────────────────────────────────────────
// All named defaults for the crate live here.
// Rationale: collecting them in one place eliminates magic numbers and makes
// threshold audits trivial. Every value below is a *default* — the live value
// always comes from the config structs in atoms/types.rs.

// ── Fuzzy matching ─────────────────────────────────────────────────────────
// Partial-ratio score (0–100) a line must *exceed* to count as a fuzzy hit.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 80.0;

// ── Vector search ──────────────────────────────────────────────────────────
// Maximum squared-L2 distance for a nearest neighbor to be trusted over
// generation. L2 on unnormalized sentence embeddings has no universal scale,
// so this is tunable per embedding model; 1.0 keeps near-duplicates and
// rejects plainly unrelated text on MiniLM-class embeddings.
pub const DEFAULT_MAX_VECTOR_DISTANCE: f32 = 1.0;

// ── Generative fallback ────────────────────────────────────────────────────
// Returned verbatim when every generation attempt fails. The caller still
// gets a normal `generated` response — adapter failures are never surfaced.
pub const GENERATION_FALLBACK_REPLY: &str = "Sorry, I couldn't generate a response.";

/// Wall-clock budget for a single resolve()'s generation stage.
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 30;

/// Default generation model.
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.0-flash";

// ── Retry schedule for the generation adapter ──────────────────────────────
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_RETRY_DELAY_MS: u64 = 1000;

// ── Embedding client ───────────────────────────────────────────────────────
pub const DEFAULT_EMBEDDING_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm";
pub const EMBED_REQUEST_TIMEOUT_SECS: u64 = 60;
