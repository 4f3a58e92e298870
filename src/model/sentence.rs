//! Refined sentence list artifact (spec §3, §4.9).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentenceSource {
    #[serde(rename = "aeneas+silence.start")]
    AeneasSilenceStart,
    #[serde(rename = "aeneas+no-snap")]
    AeneasNoSnap,
    #[serde(rename = "aeneas+pre-snap")]
    AeneasPreSnap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinedSentence {
    pub id: String,
    pub start: f64,
    pub end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_word_idx: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_word_idx: Option<usize>,
    pub source: SentenceSource,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SentinelWindow {
    pub window: [f64; 2],
    pub retention: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineStats {
    pub snapped_count: usize,
    pub no_snap_count: usize,
    pub overlap_fixes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineParams {
    pub silence_threshold_db: f64,
    pub min_silence_dur_sec: f64,
    pub min_word_ms: f64,
    pub short_phrase_guard_s: f64,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            silence_threshold_db: -35.0,
            min_silence_dur_sec: 0.12,
            min_word_ms: 30.0,
            short_phrase_guard_s: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinedSentences {
    pub params: RefineParams,
    pub sentences: Vec<RefinedSentence>,
    pub opening_sentinel: SentinelWindow,
    pub stats: RefineStats,
}
