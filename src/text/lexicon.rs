//! Stopwords, a US↔UK spelling lexicon, and a small confusion set used by
//! the canonical tokenizer and anchor selector (spec §4.6 step 1).

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;

pub static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "and", "but", "or", "nor", "so", "yet", "for", "of", "to", "in", "on",
        "at", "by", "with", "from", "as", "is", "was", "were", "be", "been", "being", "am", "are",
        "it", "its", "this", "that", "these", "those", "he", "she", "they", "them", "his", "her",
        "their", "i", "you", "we", "us", "our", "your", "my", "me", "him", "not", "no", "do",
        "does", "did", "has", "have", "had", "will", "would", "shall", "should", "can", "could",
        "may", "might", "must", "there", "here", "then", "than", "what", "which", "who", "whom",
        "if", "into", "up", "out", "about", "over", "under", "again", "further", "all", "any",
        "both", "each", "few", "more", "most", "other", "some", "such", "only", "own", "same",
        "too", "very", "just",
    ]
    .into_iter()
    .collect()
});

/// US→UK spelling equivalences (bidirectional lookup via [`normalize_spelling`]).
pub static US_UK_LEXICON: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("color", "colour"),
        ("favor", "favour"),
        ("honor", "honour"),
        ("labor", "labour"),
        ("neighbor", "neighbour"),
        ("theater", "theatre"),
        ("center", "centre"),
        ("meter", "metre"),
        ("defense", "defence"),
        ("offense", "offence"),
        ("traveled", "travelled"),
        ("traveling", "travelling"),
        ("realize", "realise"),
        ("analyze", "analyse"),
        ("organize", "organise"),
        ("gray", "grey"),
        ("mom", "mum"),
    ]
    .into_iter()
    .collect()
});

/// Fold a US spelling to its UK equivalent (or the reverse), so the
/// canonical tokenizer treats `color`/`colour` as the same token.
pub fn normalize_spelling(token: &str) -> String {
    if let Some(uk) = US_UK_LEXICON.get(token) {
        return (*uk).to_string();
    }
    for (us, uk) in US_UK_LEXICON.iter() {
        if token == *uk {
            return (*us).to_string();
        }
    }
    token.to_string()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_us_to_uk() {
        assert_eq!(normalize_spelling("color"), "colour");
    }

    #[test]
    fn folds_uk_to_us_representative() {
        assert_eq!(normalize_spelling("colour"), "colour");
    }

    #[test]
    fn common_function_words_are_stopwords() {
        assert!(is_stopword("the"));
        assert!(is_stopword("was"));
        assert!(!is_stopword("forest"));
    }
}
