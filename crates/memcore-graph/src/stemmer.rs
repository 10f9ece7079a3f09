//! Deterministic suffix-stripping stemmer used by `GraphStore::instructions`
//! topic matching (spec §4.1).
//!
//! Rule: lowercase; words of length ≤ 3 pass through unchanged; then try
//! suffixes in order — first the doubled-consonant `-ing` family, then the
//! common inflection family, then a trailing bare `s` not preceded by
//! `s` — stripping the first one that applies while keeping at least 3
//! leading characters.

/// Doubled-consonant `-ing` endings, tried before the plain `-ing` in
/// `COMMON_SUFFIXES` so "running" stems to "run", not "runn".
const DOUBLED_ING_SUFFIXES: [&str; 8] = [
    "ting", "sing", "ning", "ling", "ring", "ding", "ping", "ying",
];

const COMMON_SUFFIXES: [&str; 7] = ["ied", "ies", "ing", "ed", "er", "es", "ly"];

pub fn stem_word(word: &str) -> String {
    let w = word.to_lowercase();
    if w.len() <= 3 {
        return w;
    }

    for suf in DOUBLED_ING_SUFFIXES {
        if let Some(stripped) = strip_if_long_enough(&w, suf) {
            return stripped;
        }
    }

    for suf in COMMON_SUFFIXES {
        if let Some(stripped) = strip_if_long_enough(&w, suf) {
            return stripped;
        }
    }

    if w.ends_with('s') && !w.ends_with("ss") && w.len() - 1 >= 3 {
        return w[..w.len() - 1].to_string();
    }

    w
}

fn strip_if_long_enough(w: &str, suffix: &str) -> Option<String> {
    if w.ends_with(suffix) && w.len() - suffix.len() >= 3 {
        Some(w[..w.len() - suffix.len()].to_string())
    } else {
        None
    }
}

/// Split `topic` into words of length > 2 and stem each (spec §4.1).
pub fn stem_topic_words(topic: &str) -> Vec<String> {
    topic
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(stem_word)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_words_pass_through() {
        assert_eq!(stem_word("cat"), "cat");
        assert_eq!(stem_word("it"), "it");
    }

    #[test]
    fn doubled_consonant_ing_strips_to_three_chars() {
        assert_eq!(stem_word("running"), "run");
    }

    #[test]
    fn plain_ing_strips() {
        assert_eq!(stem_word("reading"), "read");
    }

    #[test]
    fn trailing_s_strips_when_not_double_s() {
        assert_eq!(stem_word("reports"), "report");
        assert_eq!(stem_word("process"), "process");
    }

    #[test]
    fn does_not_strip_below_three_chars() {
        // "ing" itself is 3 chars -> passes through unchanged.
        assert_eq!(stem_word("ing"), "ing");
    }

    #[test]
    fn stem_topic_words_drops_short_tokens() {
        let words = stem_topic_words("the GSC reports are due");
        assert!(words.contains(&"report".to_string()));
        assert!(!words.iter().any(|w| w == "the"));
    }
}
