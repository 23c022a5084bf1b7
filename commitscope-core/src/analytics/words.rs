//! Commit-message tokenization and word counting
//!
//! Pure functions so the word-frequency pipeline is testable without a
//! database.

use std::collections::HashMap;

/// Tokens shorter than this are discarded.
pub const MIN_TOKEN_LEN: usize = 2;

/// Common English words filtered out of commit-message counts.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "be", "been", "being", "to",
    "of", "for", "in", "on", "by", "at", "this", "that", "these", "those", "with", "as", "from",
    "about", "into", "through", "during", "before", "after", "above", "below", "up", "down", "i",
    "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your", "yours", "yourself",
    "yourselves", "he", "him", "his", "himself", "she", "her", "hers", "herself", "it", "its",
    "itself", "they", "them", "their", "theirs", "themselves", "what", "which", "who", "whom",
    "when", "where", "why", "how", "all", "any", "both", "each", "few", "more", "most", "other",
    "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very", "can",
    "will", "just", "should", "now",
];

/// True for words excluded from frequency counts.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Split text into countable tokens.
///
/// Lower-cases the input, splits on non-alphanumeric characters, and
/// keeps tokens that start with an ASCII letter, meet the minimum
/// length, and are not stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| {
            token.len() >= MIN_TOKEN_LEN
                && token.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
                && !is_stop_word(token)
        })
        .map(str::to_string)
        .collect()
}

/// Count token occurrences across messages.
///
/// Returns `(word, count)` pairs ordered by count descending, ties
/// broken lexically, so the result is deterministic.
pub fn count_words<I>(messages: I) -> Vec<(String, i64)>
where
    I: Iterator<Item = String>,
{
    let mut counts: HashMap<String, i64> = HashMap::new();
    for message in messages {
        for token in tokenize(&message) {
            *counts.entry(token).or_insert(0) += 1;
        }
    }

    let mut counted: Vec<(String, i64)> = counts.into_iter().collect();
    counted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counted
}
