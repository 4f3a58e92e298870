//! Canonical tokenizer (spec §4.6 step 1).
//!
//! Lowercases, folds width/accents, strips punctuation, optionally folds
//! US/UK spelling, and keeps a mapping from each emitted token back to its
//! original word index so downstream stages (anchors, alignment) can cite
//! positions in the untouched book/ASR word streams.

use unicode_normalization::UnicodeNormalization;

use super::lexicon::{is_stopword, normalize_spelling};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalToken {
    pub text: String,
    pub source_index: usize,
    pub is_stopword: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TokenizerConfig {
    pub fold_spelling: bool,
}

/// Fold accents/width to their base form, lowercase, and drop anything
/// that is not alphanumeric. Returns `None` if the word canonicalizes to
/// the empty string (pure punctuation, e.g. an em-dash standing alone).
fn canonical_form(raw: &str, fold_spelling: bool) -> Option<String> {
    let folded: String = raw
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect();
    let stripped: String = folded
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();
    if stripped.is_empty() {
        return None;
    }
    if fold_spelling {
        Some(normalize_spelling(&stripped))
    } else {
        Some(stripped)
    }
}

/// Tokenize a sequence of raw words, keeping the original index of each
/// surviving token. Words that fold to nothing are dropped entirely, not
/// emitted as empty tokens, so `source_index` is not necessarily
/// contiguous.
pub fn tokenize(words: &[&str], config: &TokenizerConfig) -> Vec<CanonicalToken> {
    words
        .iter()
        .enumerate()
        .filter_map(|(idx, word)| {
            canonical_form(word, config.fold_spelling).map(|text| {
                let is_stop = is_stopword(&text);
                CanonicalToken {
                    text,
                    source_index: idx,
                    is_stopword: is_stop,
                }
            })
        })
        .collect()
}

/// Content-bearing tokens only (stopwords excluded), used by the n-gram
/// miner so anchors land on distinctive words rather than function words.
pub fn content_tokens<'a>(tokens: &'a [CanonicalToken]) -> Vec<&'a CanonicalToken> {
    tokens.iter().filter(|t| !t.is_stopword).collect()
}
