//! Keyword refiner — turns raw trigger terms into a compact retrieval set.
//!
//! Raw terms arrive as free-form phrases (possessives, hyphenated compounds,
//! multi-word descriptions). The refiner scores and filters them down to at
//! most [`MAX_KEYWORDS`] retrieval-safe tokens. The canonical stub (display
//! name minus kind prefix, lowercased) is always present in the output, so an
//! entity stays retrievable even when no raw terms were supplied at all.
//!
//! Pure function: no I/O, no shared state.

use std::collections::HashMap;

/// Maximum number of keywords retained after refinement.
pub const MAX_KEYWORDS: usize = 10;

const MAX_TOKEN_CHARS: usize = 32;
const MAX_TOKEN_WORDS: usize = 4;

/// Stopwords, generic nouns, and temporal-context words that make poor
/// retrieval triggers on their own. A token equal to the canonical stub is
/// exempt — the stub must survive refinement no matter what it looks like.
const REJECTED_TOKENS: &[&str] = &[
    // stopwords
    "a", "an", "and", "at", "by", "for", "from", "in", "into", "it", "its", "of", "on", "or",
    "that", "the", "their", "them", "they", "this", "to", "was", "were", "with",
    // generic nouns
    "man", "woman", "person", "people", "place", "thing", "things", "one", "group", "area",
    "room", "world", "way", "side", "part", "name", "time", "times",
    // temporal context
    "day", "night", "morning", "evening", "afternoon", "noon", "midnight", "dawn", "dusk",
    "hour", "hours", "minute", "minutes", "moment", "today", "tomorrow", "yesterday", "now",
    "later", "soon", "week", "month", "year",
];

/// Derive the canonical stub from a display name: strip a leading
/// `<kind>-` prefix when present, lowercase, trim.
pub fn canonical_stub(display_name: &str, kind: &str) -> String {
    let name = display_name.trim();
    let prefix = format!("{}-", kind);
    // get(..) guards the char boundary: names are arbitrary text, and a
    // multibyte character straddling the prefix length must not slice.
    let stripped = match name.get(..prefix.len()) {
        Some(head) if name.len() > prefix.len() && head.eq_ignore_ascii_case(&prefix) => {
            &name[prefix.len()..]
        }
        _ => name,
    };
    stripped.trim().to_lowercase()
}

fn is_rejected(token: &str) -> bool {
    token
        .split_whitespace()
        .all(|w| REJECTED_TOKENS.contains(&w))
}

fn too_large(token: &str) -> bool {
    token.chars().count() > MAX_TOKEN_CHARS
        || token.split_whitespace().count() > MAX_TOKEN_WORDS
}

fn dehyphenate(token: &str) -> String {
    token.replace('-', " ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn deapostrophe(token: &str) -> String {
    let trimmed = token
        .strip_suffix("'s")
        .or_else(|| token.strip_suffix("\u{2019}s"))
        .unwrap_or(token);
    trimmed.replace(['\'', '\u{2019}'], "")
}

/// The longest token of a multi-word term that is not a rejected word.
/// Used as a secondary anchor so a phrase like "the gray witch of Ashfen"
/// still triggers on "ashfen" alone.
fn longest_anchor(token: &str) -> Option<String> {
    token
        .split_whitespace()
        .filter(|w| !REJECTED_TOKENS.contains(w))
        .max_by_key(|w| w.chars().count())
        .map(|w| w.to_string())
}

/// Refine raw trigger terms into an ordered retrieval keyword list.
///
/// Scoring:
/// - the stub and its hyphen-free variant get maximum weight, unconditionally;
/// - earlier-supplied raw terms outrank later ones;
/// - a token containing the stub gets a bonus;
/// - single-word tokens get a small bonus, very long tokens a small penalty.
///
/// Candidates are sorted by score descending (alphabetical tie-break) and
/// truncated to [`MAX_KEYWORDS`].
pub fn refine_keywords(raw_terms: &[String], display_name: &str, kind: &str) -> Vec<String> {
    let stub = canonical_stub(display_name, kind);

    let mut scores: HashMap<String, i64> = HashMap::new();
    let mut consider = |token: String, score: i64| {
        if token.is_empty() {
            return;
        }
        if token != stub && (too_large(&token) || is_rejected(&token)) {
            return;
        }
        let entry = scores.entry(token).or_insert(i64::MIN);
        if score > *entry {
            *entry = score;
        }
    };

    // The stub always survives, at maximum weight.
    consider(stub.clone(), i64::MAX);
    let stub_flat = dehyphenate(&stub);
    if stub_flat != stub {
        consider(stub_flat, i64::MAX - 1);
    }

    for (idx, raw) in raw_terms.iter().enumerate() {
        let base = 1000 - (idx as i64) * 10;
        let mut variants = vec![raw.trim().to_lowercase()];
        let flat = dehyphenate(&variants[0]);
        if flat != variants[0] {
            variants.push(flat);
        }
        let plain = deapostrophe(&variants[0]);
        if plain != variants[0] {
            variants.push(plain);
        }
        if variants[0].split_whitespace().count() > 1 {
            if let Some(anchor) = longest_anchor(&variants[0]) {
                variants.push(anchor);
            }
        }

        for (v_idx, variant) in variants.into_iter().enumerate() {
            // Derived variants score just under their source term.
            let mut score = base - v_idx as i64;
            if !stub.is_empty() && variant.contains(&stub) {
                score += 25;
            }
            if variant.split_whitespace().count() == 1 {
                score += 5;
            }
            if variant.chars().count() > 20 {
                score -= 5;
            }
            consider(variant, score);
        }
    }

    let mut ranked: Vec<(String, i64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(MAX_KEYWORDS);
    ranked.into_iter().map(|(token, _)| token).collect()
}
