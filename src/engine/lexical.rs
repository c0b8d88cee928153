// ── Lexical Matcher ────────────────────────────────────────────────────────
// Stage 1 and 2 of the retrieval cascade: exact substring matching, then
// fuzzy string-similarity scoring over a character's known lines.
//
// Both functions are pure reads over a slice of lines — the policy fetches
// the lines from the corpus store and passes them in, keeping this module
// trivially testable.

use crate::atoms::types::{FuzzyConfig, FuzzyScorer, MatchResult, MatchSource};
use crate::engine::corpus::normalize_line;

// ═══════════════════════════════════════════════════════════════════════════
// Exact match
// ═══════════════════════════════════════════════════════════════════════════

/// Find a line containing the utterance as a space-padded substring.
/// Both sides are compared normalized and case-sensitive as stored.
///
/// Among qualifying lines the *shortest* wins (a long line that happens to
/// contain the phrase is a worse answer than the line that is mostly the
/// phrase); ties go to the earliest stored line.
///
/// Empty utterance or empty line set → `None`. Normal miss, never an error.
pub fn find_exact(character_name: &str, lines: &[String], utterance: &str) -> Option<MatchResult> {
    let query = normalize_line(utterance);
    if character_name.trim().is_empty() || query.is_empty() {
        return None;
    }
    // Padding both sides makes "contains" respect word boundaries and still
    // accept an utterance equal to the entire line.
    let needle = format!(" {} ", query);

    let mut best: Option<&str> = None;
    for line in lines {
        let hay = format!(" {} ", normalize_line(line));
        if hay.contains(&needle) {
            let candidate = line.as_str();
            if best.map_or(true, |b| candidate.chars().count() < b.chars().count()) {
                best = Some(candidate);
            }
        }
    }

    best.map(|line| MatchResult {
        line_text: normalize_line(line),
        movie_title: String::new(),
        character_name: character_name.to_string(),
        score: 100.0,
        source: MatchSource::Exact,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Fuzzy match
// ═══════════════════════════════════════════════════════════════════════════

/// Score every line against the utterance with the configured scorer and
/// return the best one — but only when its score strictly exceeds the
/// configured threshold. Below-threshold maxima are a miss, not a weak hit.
pub fn find_fuzzy(
    character_name: &str,
    lines: &[String],
    utterance: &str,
    config: &FuzzyConfig,
) -> Option<MatchResult> {
    let query = normalize_line(utterance);
    if character_name.trim().is_empty() || query.is_empty() || lines.is_empty() {
        return None;
    }

    let mut best: Option<(&str, f64)> = None;
    for line in lines {
        let normalized = normalize_line(line);
        if normalized.is_empty() {
            continue;
        }
        let score = match config.scorer {
            FuzzyScorer::PartialRatio => partial_ratio(&query, &normalized),
            FuzzyScorer::SimpleRatio => simple_ratio(&query, &normalized),
        };
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((line.as_str(), score));
        }
    }

    let (line, score) = best?;
    if score <= config.threshold {
        return None;
    }
    Some(MatchResult {
        line_text: normalize_line(line),
        movie_title: String::new(),
        character_name: character_name.to_string(),
        score,
        source: MatchSource::Fuzzy,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Scorers
// ═══════════════════════════════════════════════════════════════════════════

/// Whole-string similarity on a 0–100 scale (normalized edit distance).
pub fn simple_ratio(a: &str, b: &str) -> f64 {
    (strsim::normalized_levenshtein(a, b) * 100.0).clamp(0.0, 100.0)
}

/// Best-window similarity on a 0–100 scale: slide a window the length of the
/// shorter string across the longer one and keep the best whole-string score.
/// This is what makes a short utterance match the middle of a long line.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (&a_chars, &b_chars)
    } else {
        (&b_chars, &a_chars)
    };

    let window = short.len();
    let short_str: String = short.iter().collect();
    let mut best = 0.0_f64;
    for start in 0..=(long.len() - window) {
        let slice: String = long[start..start + window].iter().collect();
        let score = simple_ratio(&short_str, &slice);
        if score > best {
            best = score;
        }
        if best >= 100.0 {
            break;
        }
    }
    best.clamp(0.0, 100.0)
}
