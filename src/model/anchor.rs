//! Anchor artifact (spec §3, §4.6).
//!
//! Open Question 1 (spec §9): the canonical output carries both the
//! pre-LIS `candidates` and the post-LIS `selected` lists, rather than
//! only the newer single-list form.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorMeta {
    pub book_hash: String,
    pub asr_hash: String,
    pub tokenizer_version: String,
    pub stopwords_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorParams {
    pub ngram: usize,
    pub relax_down_to: usize,
    pub target_per_tokens: f64,
    pub min_separation: usize,
}

impl Default for AnchorParams {
    fn default() -> Self {
        Self {
            ngram: 3,
            relax_down_to: 2,
            target_per_tokens: 0.02,
            min_separation: 20,
        }
    }
}

/// A candidate `(book position, ASR position)` pair before LIS filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorCandidate {
    /// Filtered (stopword-stripped) book stream position.
    pub bp: usize,
    /// Filtered ASR stream position.
    pub ap: usize,
    /// Original `BookIndex.words` index corresponding to `bp`.
    pub bp_word_index: usize,
    pub score: f64,
    pub ngram_size: usize,
}

/// A selected, LIS-monotone anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorSelected {
    pub bp: usize,
    pub ap: usize,
    pub bp_word_index: usize,
    pub score: f64,
    pub ngram_size: usize,
}

impl From<&AnchorCandidate> for AnchorSelected {
    fn from(c: &AnchorCandidate) -> Self {
        Self {
            bp: c.bp,
            ap: c.ap,
            bp_word_index: c.bp_word_index,
            score: c.score,
            ngram_size: c.ngram_size,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorStats {
    pub candidate_count: usize,
    pub selected_count: usize,
    pub relaxed_to_ngram: usize,
    pub section_localized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub localized_section_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorArtifact {
    pub meta: AnchorMeta,
    pub params: AnchorParams,
    pub candidates: Vec<AnchorCandidate>,
    pub selected: Vec<AnchorSelected>,
    pub stats: AnchorStats,
}
