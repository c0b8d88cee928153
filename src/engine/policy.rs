// ── Retrieval Policy ───────────────────────────────────────────────────────
// The cascade that answers one utterance:
//
//   START → LEXICAL_EXACT → LEXICAL_FUZZY → VECTOR_SEARCH → GENERATE → DONE
//
// Precision over recall: prefer an exact canon line, then a near-canon line,
// then a semantically similar canon line, and only synthesize text when real
// data runs out. Each stage either produces the answer or falls through.
//
// The policy owns no state of its own — it is a function of the query, the
// injected collaborators, and its thresholds. Only an invalid input is ever
// an error for the caller; everything after START resolves to a best-effort
// textual response.

use crate::atoms::constants::GENERATION_FALLBACK_REPLY;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{
    DialogueRecord, MatchResult, MatchSource, QueryScope, Resolution, RetrievalConfig,
};
use crate::engine::corpus::{normalize_line, CorpusStore};
use crate::engine::embedding::Embedder;
use crate::engine::generate::Generator;
use crate::engine::index::DialogueIndex;
use crate::engine::lexical;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Movie title recorded for cached-back generated lines, which have no
/// canonical source movie.
const GENERATED_MOVIE_TITLE: &str = "AI Generated";

/// The retrieval engine: corpus + index + adapters, wired into the cascade.
pub struct RetrievalEngine {
    store: Arc<CorpusStore>,
    index: Arc<DialogueIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    config: RetrievalConfig,
    /// "Vector stage skipped, index empty" is logged once per process,
    /// not once per request.
    empty_index_logged: AtomicBool,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<CorpusStore>,
        index: Arc<DialogueIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: RetrievalConfig,
    ) -> Self {
        RetrievalEngine {
            store,
            index,
            embedder,
            generator,
            config,
            empty_index_logged: AtomicBool::new(false),
        }
    }

    /// Embed the full corpus and (re)build the vector index. Run once at
    /// startup; tolerates an empty corpus.
    pub async fn build_index(&self) -> EngineResult<usize> {
        let records = self.store.all_records()?;
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let vector = self.embedder.embed(&record.line_text).await?;
            entries.push((vector, record));
        }
        let count = entries.len();
        self.index.build(entries)?;
        info!(
            "[policy] Indexed {} dialogue lines with model '{}'",
            count,
            self.embedder.model()
        );
        Ok(count)
    }

    /// Resolve one utterance to the best available reply.
    /// The entire upward-facing contract of the crate.
    pub async fn resolve(&self, scope: &QueryScope, utterance: &str) -> EngineResult<Resolution> {
        // ── START: input validation ──────────────────────────────────
        let query = normalize_line(utterance);
        if query.is_empty() {
            return Err(EngineError::input("utterance is required"));
        }
        let subject = scope
            .subject()
            .ok_or_else(|| EngineError::input("a character or movie scope is required"))?
            .to_string();

        // ── LEXICAL_EXACT + LEXICAL_FUZZY ────────────────────────────
        // Both need a character to scope the line set; with a movie-only
        // scope they are skipped. An exact hit short-circuits fuzzy.
        if let Some(character) = scope.character.as_deref().filter(|c| !c.trim().is_empty()) {
            match self.store.get_lines(character) {
                Ok(lines) => {
                    if let Some(hit) = lexical::find_exact(character, &lines, &query) {
                        info!("[policy] Exact match for '{}'", character);
                        return Ok(self.lexical_resolution(hit));
                    }
                    if let Some(hit) =
                        lexical::find_fuzzy(character, &lines, &query, &self.config.fuzzy)
                    {
                        info!(
                            "[policy] Fuzzy match for '{}' (score {:.1})",
                            character, hit.score
                        );
                        return Ok(self.lexical_resolution(hit));
                    }
                }
                // Store trouble in the middle of the cascade is a miss,
                // not a caller-visible failure.
                Err(e) => warn!("[policy] Lexical stage skipped, corpus read failed: {}", e),
            }
        }

        // ── VECTOR_SEARCH ────────────────────────────────────────────
        if let Some(resolution) = self.vector_stage(&query).await {
            return Ok(resolution);
        }

        // ── GENERATE ─────────────────────────────────────────────────
        Ok(self.generate_stage(scope, &subject, &query).await)
    }

    /// Nearest-neighbor stage. Every failure mode here is a miss: empty
    /// index (logged once), embedding failure, dimension drift, or a
    /// position with no metadata (a defect, but never a crash).
    async fn vector_stage(&self, query: &str) -> Option<Resolution> {
        if self.index.is_empty() {
            if !self.empty_index_logged.swap(true, Ordering::SeqCst) {
                info!("[policy] Vector index is empty, stage will be skipped until built");
            }
            return None;
        }

        let query_vector = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!("[policy] Vector stage skipped, embedding failed: {}", e);
                return None;
            }
        };

        let hits = match self.index.search(&query_vector, 1) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("[policy] Vector stage skipped, search failed: {}", e);
                return None;
            }
        };
        let (position, distance) = *hits.first()?;

        if distance > self.config.max_vector_distance {
            info!(
                "[policy] Nearest neighbor rejected (distance {:.3} > cutoff {:.3})",
                distance, self.config.max_vector_distance
            );
            return None;
        }

        let Some(record) = self.index.record_at(position) else {
            // Positional join broken — defect, downgraded to a miss.
            error!(
                "[policy] Index position {} has no metadata entry (index len {})",
                position,
                self.index.len()
            );
            return None;
        };

        info!(
            "[policy] Vector match '{}' / '{}' at distance {:.3}",
            record.movie_title, record.character_name, distance
        );
        Some(Resolution {
            text: record.line_text,
            source: MatchSource::Vector,
            confidence: Some(distance as f64),
            movie_title: Some(record.movie_title),
            character_name: Some(record.character_name),
        })
    }

    /// Generation stage. Always yields a user-visible reply: the generated
    /// text, or the static apology when the adapter's retries are spent or
    /// the wall-clock budget runs out. Successful replies are cached back
    /// into corpus and index when configured.
    async fn generate_stage(&self, scope: &QueryScope, subject: &str, query: &str) -> Resolution {
        let budget = Duration::from_secs(self.config.generation_timeout_secs);
        let outcome = tokio::time::timeout(budget, self.generator.generate(subject, query)).await;

        let text = match outcome {
            Ok(Ok(text)) => {
                if self.config.cache_generated {
                    self.cache_back(scope, subject, &text).await;
                }
                text
            }
            Ok(Err(e)) => {
                warn!("[policy] Generation failed, substituting fallback reply: {}", e);
                GENERATION_FALLBACK_REPLY.to_string()
            }
            Err(_) => {
                warn!(
                    "[policy] Generation timed out after {}s, substituting fallback reply",
                    self.config.generation_timeout_secs
                );
                GENERATION_FALLBACK_REPLY.to_string()
            }
        };

        Resolution {
            text,
            source: MatchSource::Generated,
            confidence: None,
            movie_title: None,
            character_name: Some(subject.to_string()),
        }
    }

    /// Persist a generated reply so the next identical query resolves from
    /// the corpus. Best-effort on both writes: a failed append or a failed
    /// embedding only costs future reuse, never this response.
    async fn cache_back(&self, scope: &QueryScope, subject: &str, text: &str) {
        let record = DialogueRecord {
            movie_title: scope
                .movie
                .clone()
                .unwrap_or_else(|| GENERATED_MOVIE_TITLE.to_string()),
            character_name: subject.to_string(),
            line_text: text.to_string(),
        };

        if let Err(e) = self.store.append(&record, true) {
            warn!("[policy] Cache-back append failed: {}", e);
            return;
        }
        match self.embedder.embed(&record.line_text).await {
            Ok(vector) => {
                if let Err(e) = self.index.add(vector, record) {
                    warn!("[policy] Cache-back index add failed: {}", e);
                }
            }
            Err(e) => warn!("[policy] Cache-back embedding failed: {}", e),
        }
    }

    fn lexical_resolution(&self, hit: MatchResult) -> Resolution {
        Resolution {
            text: hit.line_text,
            source: hit.source,
            confidence: Some(hit.score),
            movie_title: None,
            character_name: Some(hit.character_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::FuzzyConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    // ── Fakes ──────────────────────────────────────────────────────────

    /// Embeds known strings to fixed vectors; everything else lands far away.
    struct FakeEmbedder {
        known: HashMap<String, Vec<f32>>,
    }

    impl FakeEmbedder {
        fn new(pairs: &[(&str, [f32; 2])]) -> Self {
            FakeEmbedder {
                known: pairs
                    .iter()
                    .map(|(text, v)| (text.to_string(), v.to_vec()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
            Ok(self
                .known
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![9.0, 9.0]))
        }

        fn model(&self) -> &str {
            "fake-embedder"
        }
    }

    /// Always fails to embed — for exercising the miss path.
    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> EngineResult<Vec<f32>> {
            Err(EngineError::Embedding("no server".into()))
        }

        fn model(&self) -> &str {
            "broken"
        }
    }

    struct FakeGenerator {
        reply: Option<String>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FakeGenerator {
        fn replying(text: &str) -> Self {
            FakeGenerator {
                reply: Some(text.to_string()),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn failing() -> Self {
            FakeGenerator { reply: None, calls: AtomicUsize::new(0), delay: Duration::ZERO }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn generate(&self, _subject: &str, _utterance: &str) -> EngineResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.reply {
                Some(text) => Ok(text.clone()),
                None => Err(EngineError::generation("fake", "service down")),
            }
        }
    }

    // ── Helpers ────────────────────────────────────────────────────────

    fn seeded_store(lines: &[(&str, &str)]) -> Arc<CorpusStore> {
        let store = CorpusStore::open_in_memory().unwrap();
        for (character, line) in lines {
            store
                .append(
                    &DialogueRecord {
                        movie_title: "Test Movie".into(),
                        character_name: character.to_string(),
                        line_text: line.to_string(),
                    },
                    false,
                )
                .unwrap();
        }
        Arc::new(store)
    }

    fn engine(
        store: Arc<CorpusStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: RetrievalConfig,
    ) -> RetrievalEngine {
        RetrievalEngine::new(store, Arc::new(DialogueIndex::new()), embedder, generator, config)
    }

    // ── START stage ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_empty_utterance_is_input_error() {
        let eng = engine(
            seeded_store(&[]),
            Arc::new(BrokenEmbedder),
            Arc::new(FakeGenerator::failing()),
            RetrievalConfig::default(),
        );
        let err = eng.resolve(&QueryScope::character("JACK"), "   ").await.unwrap_err();
        assert!(matches!(err, EngineError::Input(_)));
    }

    #[tokio::test]
    async fn test_empty_scope_is_input_error() {
        let eng = engine(
            seeded_store(&[]),
            Arc::new(BrokenEmbedder),
            Arc::new(FakeGenerator::failing()),
            RetrievalConfig::default(),
        );
        let err = eng.resolve(&QueryScope::default(), "hello").await.unwrap_err();
        assert!(matches!(err, EngineError::Input(_)));
    }

    // ── Lexical stages ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_exact_match_short_circuits_generation() {
        let store = seeded_store(&[("JACK", "I can't believe we are doing this.")]);
        let generator = Arc::new(FakeGenerator::replying("should not be used"));
        let eng = engine(
            store,
            Arc::new(BrokenEmbedder),
            generator.clone(),
            RetrievalConfig::default(),
        );

        let res = eng
            .resolve(&QueryScope::character("JACK"), "I can't believe we are doing this.")
            .await
            .unwrap();
        assert_eq!(res.source, MatchSource::Exact);
        assert_eq!(res.text, "I can't believe we are doing this.");
        assert_eq!(res.confidence, Some(100.0));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_fuzzy_match_when_exact_misses() {
        let store = seeded_store(&[("JESSEP", "You can't handle the truth!")]);
        let eng = engine(
            store,
            Arc::new(BrokenEmbedder),
            Arc::new(FakeGenerator::failing()),
            RetrievalConfig::default(),
        );

        let res = eng
            .resolve(&QueryScope::character("JESSEP"), "you cant handle the truth")
            .await
            .unwrap();
        assert_eq!(res.source, MatchSource::Fuzzy);
        assert_eq!(res.text, "You can't handle the truth!");
        assert!(res.confidence.unwrap() > 80.0);
    }

    #[tokio::test]
    async fn test_movie_only_scope_skips_lexical() {
        // A line the lexical stages would match — but with no character in
        // scope they never run, and the empty index pushes us to generation.
        let store = seeded_store(&[("JACK", "word for word the same")]);
        let generator = Arc::new(FakeGenerator::replying("from the model"));
        let eng = engine(store, Arc::new(BrokenEmbedder), generator.clone(), RetrievalConfig::default());

        let res = eng
            .resolve(&QueryScope::movie("Titanic"), "word for word the same")
            .await
            .unwrap();
        assert_eq!(res.source, MatchSource::Generated);
        assert_eq!(generator.call_count(), 1);
    }

    // ── Vector stage ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_vector_match_within_cutoff() {
        let store = seeded_store(&[("TYLER", "The first rule is you do not talk about it.")]);
        let embedder = Arc::new(FakeEmbedder::new(&[
            ("The first rule is you do not talk about it.", [0.0, 1.0]),
            ("what's the first rule again", [0.1, 1.0]),
        ]));
        let generator = Arc::new(FakeGenerator::replying("unused"));
        let eng = engine(store, embedder, generator.clone(), RetrievalConfig::default());
        eng.build_index().await.unwrap();

        // Different character scope, so lexical misses; embedding is close.
        let res = eng
            .resolve(&QueryScope::character("NARRATOR"), "what's the first rule again")
            .await
            .unwrap();
        assert_eq!(res.source, MatchSource::Vector);
        assert_eq!(res.text, "The first rule is you do not talk about it.");
        assert_eq!(res.character_name.as_deref(), Some("TYLER"));
        assert!(res.confidence.unwrap() < 0.1);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_vector_beyond_cutoff_falls_to_generation() {
        let store = seeded_store(&[("TYLER", "The first rule is you do not talk about it.")]);
        let embedder = Arc::new(FakeEmbedder::new(&[(
            "The first rule is you do not talk about it.",
            [0.0, 1.0],
        )]));
        // unknown query embeds to [9,9] — far outside the cutoff
        let generator = Arc::new(FakeGenerator::replying("a fresh reply"));
        let mut config = RetrievalConfig::default();
        config.cache_generated = false;
        let eng = engine(store, embedder, generator.clone(), config);
        eng.build_index().await.unwrap();

        let res = eng
            .resolve(
                &QueryScope::character("NARRATOR"),
                "totally unrelated sentence about spreadsheets",
            )
            .await
            .unwrap();
        assert_eq!(res.source, MatchSource::Generated);
        assert_eq!(res.text, "a fresh reply");
        assert!(res.confidence.is_none());
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_a_miss_not_an_error() {
        let store = seeded_store(&[("JACK", "some line")]);
        let generator = Arc::new(FakeGenerator::replying("generated anyway"));
        let eng = engine(store.clone(), Arc::new(BrokenEmbedder), generator, RetrievalConfig::default());
        // Force the index non-empty so the stage actually attempts to embed.
        eng.index
            .add(
                vec![0.0, 0.0],
                DialogueRecord {
                    movie_title: "M".into(),
                    character_name: "C".into(),
                    line_text: "L".into(),
                },
            )
            .unwrap();

        let res = eng.resolve(&QueryScope::character("ROSE"), "anything at all").await.unwrap();
        assert_eq!(res.source, MatchSource::Generated);
    }

    // ── Generation stage ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_generator_failure_yields_apology() {
        let store = seeded_store(&[]);
        let eng = engine(
            store.clone(),
            Arc::new(BrokenEmbedder),
            Arc::new(FakeGenerator::failing()),
            RetrievalConfig::default(),
        );

        let res = eng.resolve(&QueryScope::character("JACK"), "hello there").await.unwrap();
        assert_eq!(res.source, MatchSource::Generated);
        assert_eq!(res.text, GENERATION_FALLBACK_REPLY);
        // apology is never cached back
        assert_eq!(store.line_count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_timeout_yields_apology() {
        let store = seeded_store(&[]);
        let generator = Arc::new(FakeGenerator {
            reply: Some("too late".into()),
            calls: AtomicUsize::new(0),
            delay: Duration::from_secs(120),
        });
        let mut config = RetrievalConfig::default();
        config.generation_timeout_secs = 1;
        let eng = engine(store.clone(), Arc::new(BrokenEmbedder), generator, config);

        let res = eng.resolve(&QueryScope::character("JACK"), "hello").await.unwrap();
        assert_eq!(res.text, GENERATION_FALLBACK_REPLY);
        assert_eq!(res.source, MatchSource::Generated);
        assert_eq!(store.line_count().unwrap(), 0);
    }

    // ── Cache-back ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cache_back_makes_repeat_query_lexical() {
        let store = seeded_store(&[]);
        let embedder = Arc::new(FakeEmbedder::new(&[]));
        let generator = Arc::new(FakeGenerator::replying("A generated witty reply"));
        let eng = engine(store.clone(), embedder, generator.clone(), RetrievalConfig::default());

        let first = eng
            .resolve(&QueryScope::character("JACK"), "A generated witty reply")
            .await
            .unwrap();
        assert_eq!(first.source, MatchSource::Generated);
        assert_eq!(store.line_count().unwrap(), 1);
        assert_eq!(eng.index.len(), 1);

        // The reply text is now a stored line for JACK, so repeating the
        // query (which equals the reply here) resolves lexically.
        let second = eng
            .resolve(&QueryScope::character("JACK"), "A generated witty reply")
            .await
            .unwrap();
        assert_eq!(second.source, MatchSource::Exact);
        assert_eq!(second.text, "A generated witty reply");
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_back_disabled_leaves_corpus_untouched() {
        let store = seeded_store(&[]);
        let generator = Arc::new(FakeGenerator::replying("ephemeral reply"));
        let mut config = RetrievalConfig::default();
        config.cache_generated = false;
        let eng = engine(store.clone(), Arc::new(BrokenEmbedder), generator, config);

        let res = eng.resolve(&QueryScope::character("JACK"), "hi").await.unwrap();
        assert_eq!(res.text, "ephemeral reply");
        assert_eq!(store.line_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fuzzy_threshold_respects_config() {
        let store = seeded_store(&[("JESSEP", "You can't handle the truth!")]);
        // Raise the bar past any plausible partial-ratio score.
        let mut config = RetrievalConfig::default();
        config.fuzzy = FuzzyConfig { threshold: 100.0, ..FuzzyConfig::default() };
        let generator = Arc::new(FakeGenerator::replying("generated instead"));
        let eng = engine(store, Arc::new(BrokenEmbedder), generator, config);

        let res = eng
            .resolve(&QueryScope::character("JESSEP"), "you cant handle the truth")
            .await
            .unwrap();
        assert_eq!(res.source, MatchSource::Generated);
    }
}
