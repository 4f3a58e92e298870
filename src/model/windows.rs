//! Windows artifact: book-coordinate, anchor-bounded windows used to scope
//! forced alignment (spec §3, §4.7).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowsMeta {
    pub coverage: f64,
    pub largest_gap_sec: f64,
    pub window_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowsParams {
    pub pre_pad_sec: f64,
    pub pad_sec: f64,
}

impl Default for WindowsParams {
    fn default() -> Self {
        Self { pre_pad_sec: 1.0, pad_sec: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltWindow {
    pub id: String,
    /// Half-open book-coordinate start (word index), padding included.
    pub book_start: usize,
    /// Half-open book-coordinate end (word index, exclusive), padding included.
    pub book_end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr_start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr_end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_anchor: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_anchor: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsArtifact {
    pub meta: WindowsMeta,
    pub params: WindowsParams,
    pub windows: Vec<BuiltWindow>,
}
