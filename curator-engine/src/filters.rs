//! Rule-based trending filters
//!
//! Two independent match rules over post text:
//! - **N-gram containment**: every required n-gram of a topic appears among the
//!   post's 1..=7-grams
//! - **Regex prefix**: the topic pattern matches at the start of the
//!   normalized text

use regex::Regex;
use std::collections::HashSet;

/// Longest n-gram generated from post text
pub const MAX_NGRAM: usize = 7;

/// Minimum characters in a token
const MIN_TOKEN_CHARS: usize = 2;

/// Lower-cased word tokens of at least two word characters
///
/// Word characters are alphanumerics and `_`; everything else separates tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// All 1..=`max_n`-grams of the text, tokens joined by a single space
pub fn ngram_set(text: &str, max_n: usize) -> HashSet<String> {
    let tokens = tokenize(text);
    let mut grams = HashSet::new();

    for n in 1..=max_n.min(tokens.len()) {
        for window in tokens.windows(n) {
            grams.insert(window.join(" "));
        }
    }
    grams
}

/// True if every required term is among `grams`
///
/// An empty term list never matches.
pub fn contains_all(grams: &HashSet<String>, terms: &[String]) -> bool {
    !terms.is_empty()
        && terms
            .iter()
            .all(|term| grams.contains(term.trim().to_lowercase().as_str()))
}

/// Lower-case (full Unicode rules) and replace every char outside
/// `[a-z0-9]` with a space
pub fn normalize_for_regex(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect()
}

/// True if `pattern` matches starting at the first character of `normalized`
pub fn matches_at_start(pattern: &Regex, normalized: &str) -> bool {
    pattern.find(normalized).is_some_and(|m| m.start() == 0)
}
