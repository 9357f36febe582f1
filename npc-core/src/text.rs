//! Lexical utilities shared by the router, retriever, and guardrail.
//!
//! Zero-dependency tokenization: lowercase, strip punctuation, drop
//! stopwords and single-character tokens, naive suffix stemming. Matches
//! are token-set based so "the king's secret plan" still hits a
//! "king's plan" phrase.

use std::collections::{HashMap, HashSet};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "while", "of", "in", "on", "at", "by", "for",
    "to", "from", "with", "without", "into", "onto", "over", "under", "as", "is", "are", "was",
    "were", "be", "been", "being", "this", "that", "these", "those", "here", "there", "it",
    "its", "they", "them", "he", "she", "we", "you", "i", "me", "my", "your", "his", "her",
    "our", "their", "how", "what", "when", "where", "who", "which", "whose", "why", "whether",
    "do", "does", "did", "done", "doing", "have", "has", "had", "having", "get", "got", "make",
    "makes", "made", "not", "no", "nor", "only", "just", "also", "too", "very", "much", "more",
    "most", "less", "least", "can", "could", "may", "might", "must", "shall", "should", "will",
    "would", "am", "s", "re", "ve", "ll", "d",
];

/// Strip common suffixes (ing, ed, es, s) from a token.
pub fn stem(word: &str) -> &str {
    for suffix in ["ing", "ed", "es", "s"] {
        if word.len() > suffix.len() + 2 && word.ends_with(suffix) {
            return &word[..word.len() - suffix.len()];
        }
    }
    word
}

/// Tokenize text into normalized content tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(w))
        .map(|w| stem(w).to_string())
        .collect()
}

/// Tokenize into a set for membership checks.
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// Check that every content token of `phrase` appears in `tokens`.
///
/// Empty phrases never match.
pub fn phrase_matches(tokens: &HashSet<String>, phrase: &str) -> bool {
    let phrase_tokens = tokenize(phrase);
    !phrase_tokens.is_empty() && phrase_tokens.iter().all(|t| tokens.contains(t))
}

/// Build a token-frequency vector.
pub fn term_freq(tokens: &[String]) -> HashMap<String, f32> {
    let mut tf = HashMap::new();
    for token in tokens {
        *tf.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    tf
}

/// Cosine similarity between two frequency vectors.
pub fn cosine(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let dot: f32 = a
        .iter()
        .filter_map(|(t, wa)| b.get(t).map(|wb| wa * wb))
        .sum();
    if dot == 0.0 {
        return 0.0;
    }
    let norm_a: f32 = a.values().map(|w| w * w).sum::<f32>().sqrt();
    let norm_b: f32 = b.values().map(|w| w * w).sum::<f32>().sqrt();
    dot / (norm_a * norm_b)
}

/// Count tokens shared between a query set and a document.
pub fn overlap(query: &HashSet<String>, document: &str) -> usize {
    token_set(document).intersection(query).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_strips_stopwords_and_punctuation() {
        let tokens = tokenize("What's new in the market, friend?");
        assert!(tokens.contains(&"market".to_string()));
        assert!(tokens.contains(&"friend".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"in".to_string()));
    }

    #[test]
    fn test_stemming() {
        assert_eq!(stem("patrols"), "patrol");
        assert_eq!(stem("trading"), "trad");
        assert_eq!(stem("walked"), "walk");
        // Too short to strip.
        assert_eq!(stem("sing"), "sing");
    }

    #[test]
    fn test_phrase_matches_across_interleaved_words() {
        let tokens = token_set("Can you tell me the king's secret plan?");
        assert!(phrase_matches(&tokens, "king's plan"));
        assert!(!phrase_matches(&tokens, "queen's plan"));
        assert!(!phrase_matches(&tokens, ""));
    }

    #[test]
    fn test_cosine_bounds() {
        let a = term_freq(&tokenize("market trade goods"));
        let b = term_freq(&tokenize("market trade goods"));
        let c = term_freq(&tokenize("castle dragon moat"));
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-5);
        assert_eq!(cosine(&a, &c), 0.0);
    }

    #[test]
    fn test_overlap() {
        let query = token_set("where is the east gate");
        assert_eq!(overlap(&query, "the east gate opens at dawn"), 2);
    }
}
