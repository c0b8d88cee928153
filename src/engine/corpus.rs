// ── Corpus Store ───────────────────────────────────────────────────────────
// SQLite-backed store of (movie, character, line) records via rusqlite.
// The engine reads the whole corpus at startup to build the vector index and
// reads per-character lines during lexical matching; the only write path is
// the optional cache-back of generated replies.
//
// Every write goes through `normalize_line`, so the invariant "stored lines
// are whitespace-collapsed, tag-stripped, and non-empty" holds by
// construction.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::DialogueRecord;
use log::info;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::OnceLock;

// ── Normalization ──────────────────────────────────────────────────────────

static TAG_RE: OnceLock<Regex> = OnceLock::new();
static WS_RE: OnceLock<Regex> = OnceLock::new();

/// Strip angle-bracket tags left over from script scraping, collapse runs of
/// whitespace to single spaces, and trim. Returns an empty string when
/// nothing survives — callers decide whether that is an error.
pub fn normalize_line(text: &str) -> String {
    let tag_re = TAG_RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"));
    let ws_re = WS_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    let stripped = tag_re.replace_all(text, " ");
    ws_re.replace_all(&stripped, " ").trim().to_string()
}

// ── Store ──────────────────────────────────────────────────────────────────

/// Thread-safe corpus database wrapper.
pub struct CorpusStore {
    conn: Mutex<Connection>,
}

impl CorpusStore {
    /// Open (or create) the corpus database and initialize the schema.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        info!("[corpus] Opening corpus store at {:?}", path);
        let conn = Connection::open(path)?;
        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::init_schema(conn)
    }

    /// In-memory store, used by tests and throwaway sessions.
    pub fn open_in_memory() -> EngineResult<Self> {
        Self::init_schema(Connection::open_in_memory()?)
    }

    fn init_schema(conn: Connection) -> EngineResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS dialogue_lines (
                id INTEGER PRIMARY KEY,
                movie_title TEXT NOT NULL,
                character_name TEXT NOT NULL,
                line_text TEXT NOT NULL,
                ai_generated INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_lines_character
                ON dialogue_lines(character_name);
            ",
        )?;
        Ok(CorpusStore { conn: Mutex::new(conn) })
    }

    /// All stored lines for one character, in insertion order.
    pub fn get_lines(&self, character_name: &str) -> EngineResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT line_text FROM dialogue_lines
             WHERE character_name = ?1
             ORDER BY id",
        )?;
        let lines = stmt
            .query_map(params![character_name], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(lines)
    }

    /// The full corpus, in insertion order. Used once to build the index.
    pub fn all_records(&self) -> EngineResult<Vec<DialogueRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT movie_title, character_name, line_text
             FROM dialogue_lines
             ORDER BY id",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok(DialogueRecord {
                    movie_title: row.get(0)?,
                    character_name: row.get(1)?,
                    line_text: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Append one record. Normalizes the line first; an empty-after-normalize
    /// line is rejected — the corpus never holds blank entries.
    /// `ai_generated` marks cache-back writes from the generation stage.
    pub fn append(&self, record: &DialogueRecord, ai_generated: bool) -> EngineResult<()> {
        let line = normalize_line(&record.line_text);
        if line.is_empty() {
            return Err(EngineError::input("line_text is empty after normalization"));
        }
        let created_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO dialogue_lines
                 (movie_title, character_name, line_text, ai_generated, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.movie_title,
                record.character_name,
                line,
                ai_generated as i64,
                created_at
            ],
        )?;
        Ok(())
    }

    /// Total stored lines. Logged at startup.
    pub fn line_count(&self) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM dialogue_lines", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
