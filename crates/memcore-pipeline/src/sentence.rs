//! Sentence splitting for the classifier (spec §4.3).
//!
//! Protects a fixed abbreviation list, then splits on `[.!?]` followed by
//! whitespace and an uppercase letter or opening quote.

const ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Ms.", "Dr.", "Sr.", "Jr.", "Prof.", "Inc.", "Ltd.", "Corp.", "etc.", "vs.",
    "approx.", "dept.", "govt.", "e.g.", "i.e.",
];

/// A placeholder character that cannot appear in ordinary English prose,
/// used to protect abbreviation periods from the sentence-boundary scan.
const GUARD: char = '\u{0}';

pub fn split_sentences(text: &str) -> Vec<String> {
    let mut protected = text.to_string();
    for abbr in ABBREVIATIONS {
        let guarded = abbr.replace('.', &GUARD.to_string());
        protected = protected.replace(abbr, &guarded);
    }

    let chars: Vec<char> = protected.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '.' || c == '!' || c == '?' {
            let mut j = i + 1;
            let mut saw_space = false;
            while j < chars.len() && chars[j].is_whitespace() {
                saw_space = true;
                j += 1;
            }
            let boundary = saw_space
                && (j >= chars.len()
                    || chars[j].is_uppercase()
                    || chars[j] == '"'
                    || chars[j] == '\u{201c}');
            if boundary || j >= chars.len() {
                let sentence: String = chars[start..=i].iter().collect();
                let restored = sentence.replace(GUARD, ".");
                let trimmed = restored.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }

    if start < chars.len() {
        let tail: String = chars[start..].iter().collect();
        let restored = tail.replace(GUARD, ".");
        let trimmed = restored.trim();
        if !trimmed.is_empty() {
            sentences.push(trimmed.to_string());
        }
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_simple_boundary() {
        let out = split_sentences("The sky is blue. The grass is green.");
        assert_eq!(out, vec!["The sky is blue.", "The grass is green."]);
    }

    #[test]
    fn protects_abbreviations() {
        let out = split_sentences("Dr. Smith saw Mr. Jones yesterday.");
        assert_eq!(out, vec!["Dr. Smith saw Mr. Jones yesterday."]);
    }

    #[test]
    fn handles_single_sentence() {
        let out = split_sentences("Who is Peter?");
        assert_eq!(out, vec!["Who is Peter?"]);
    }

    #[test]
    fn splits_before_quote() {
        let out = split_sentences("She said stop. \"Now.\" He left.");
        assert_eq!(out.len(), 3);
    }
}
