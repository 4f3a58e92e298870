//! Per-window forced alignment artifact (spec §3, §4.8, §6.3).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fragment {
    pub begin: f64,
    pub end: f64,
}

/// A `[startWordIdx, endWordIdx]` inclusive book-word range, carried
/// parallel to `fragments` so each aligned fragment can be traced back to
/// the book sentence it covers without re-deriving sentence boundaries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FragmentWordRange {
    pub start_word_idx: usize,
    pub end_word_idx: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowAlignment {
    pub window_id: String,
    pub offset_sec: f64,
    pub language: String,
    pub text_digest: String,
    pub fragments: Vec<Fragment>,
    pub fragment_word_ranges: Vec<FragmentWordRange>,
    pub tool_versions: BTreeMap<String, String>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

impl WindowAlignment {
    /// Fragment times converted from window-relative to chapter time.
    pub fn chapter_fragments(&self) -> Vec<Fragment> {
        self.fragments
            .iter()
            .map(|f| Fragment {
                begin: f.begin + self.offset_sec,
                end: f.end + self.offset_sec,
            })
            .collect()
    }
}
