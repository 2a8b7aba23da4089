//! "Did you mean" ranking for names that could not be found.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Splits `snake_case` and `camelCase` names into word tokens.
static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z]+(?:[a-z0-9]+)?|[a-z0-9]+").unwrap());

const MIN_SCORE: f64 = 0.5;

fn words(value: &str) -> HashSet<String> {
    WORD_RE
        .find_iter(value)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn common_prefix(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}

/// Similarity in `[0, 1]` between a missing name and a real one.
pub fn name_similarity(wanted: &str, candidate: &str) -> f64 {
    let w = wanted.trim().to_lowercase();
    let c = candidate.to_lowercase();
    if w.is_empty() || c.is_empty() {
        return 0.0;
    }
    if w == c {
        return 1.0;
    }
    if c.contains(&w) || w.contains(&c) {
        return 0.85;
    }

    let wanted_words = words(wanted);
    let candidate_words = words(candidate);
    let overlap = wanted_words.intersection(&candidate_words).count();
    let word_score = if wanted_words.is_empty() {
        0.0
    } else {
        overlap as f64 / wanted_words.len().max(candidate_words.len()) as f64
    };

    let longest = w.chars().count().max(c.chars().count());
    let prefix_score = common_prefix(&w, &c) as f64 / longest as f64;

    word_score.max(prefix_score)
}

/// Up to `limit` candidates most similar to `wanted`, best first.
/// Private names are only offered when `wanted` is itself private.
pub fn suggest<S: AsRef<str>>(wanted: &str, candidates: &[S], limit: usize) -> Vec<String> {
    let allow_private = wanted.starts_with('_');
    let mut scored: Vec<(f64, &str)> = candidates
        .iter()
        .map(AsRef::as_ref)
        .filter(|c| *c != wanted)
        .filter(|c| allow_private || !c.starts_with('_'))
        .map(|c| (name_similarity(wanted, c), c))
        .filter(|(score, _)| *score >= MIN_SCORE)
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(limit)
        .map(|(_, name)| name.to_string())
        .collect()
}
