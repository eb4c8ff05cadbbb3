//! Shared document/query analyzer: lowercase, split on non-alphanumerics,
//! strip a standard English stopword list, apply a Porter suffix stemmer.
//!
//! The stemmer is expensive to construct, so a single instance is cached
//! behind a `OnceLock` and shared by every caller, the way this crate family
//! already caches other per-process singletons.

use std::sync::OnceLock;

use rust_stemmers::{Algorithm, Stemmer};

fn stemmer() -> &'static Stemmer {
    static STEMMER: OnceLock<Stemmer> = OnceLock::new();
    STEMMER.get_or_init(|| Stemmer::create(Algorithm::English))
}

// A compact standard English stopword list; not exhaustive, but enough to
// keep BM25 term weight on content words rather than function words.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "he", "in",
    "is", "it", "its", "of", "on", "or", "that", "the", "to", "was", "were", "will", "with",
    "this", "these", "those", "we", "you", "your", "their", "them", "but", "not", "can", "if",
    "so", "than", "then", "into", "over", "such", "also", "about", "which", "who", "whom",
    "do", "does", "did", "been", "being", "i", "our", "ours", "us",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Lowercases, splits on non-alphanumeric boundaries, drops stopwords and
/// empty tokens, and stems what remains.
pub fn tokenize(text: &str) -> Vec<String> {
    let stemmer = stemmer();
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty() && !is_stopword(tok))
        .map(|tok| stemmer.stem(tok).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_splits_and_strips_stopwords() {
        let toks = tokenize("Symbolic Regression of Physical Systems");
        assert!(toks.contains(&"symbol".to_string()) || toks.contains(&"symbol".to_string()));
        assert!(!toks.contains(&"of".to_string()));
    }

    #[test]
    fn stems_suffixes_consistently() {
        let a = tokenize("regression regressions regressing");
        assert_eq!(a.iter().collect::<std::collections::HashSet<_>>().len(), 1);
    }

    #[test]
    fn empty_text_yields_no_tokens() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ...  ").is_empty());
    }
}
