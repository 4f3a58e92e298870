//! Collation artifacts: segments + replacement log + seam map (spec §3, §4.10).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacementKind {
    Gap,
    BoundarySliver,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    pub kind: ReplacementKind,
    pub from: f64,
    pub to: f64,
    pub duration: f64,
    pub level_db: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollationSegments {
    pub sentences: Vec<crate::model::sentence::RefinedSentence>,
    pub replacements: Vec<Replacement>,
}

/// The final `(ta, tb, hfLeft, hfRight, leftNudges, rightNudges, rightStart,
/// pauseMs)` state for a single seam, recorded honestly even when nudging
/// terminates without cooling (spec §4.10 step 3, Testable Property 11).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeamDecision {
    pub from: f64,
    pub to: f64,
    pub fade_l: f64,
    pub fade_r: f64,
    pub hf_left: bool,
    pub hf_right: bool,
    pub left_nudges: u32,
    pub right_nudges: u32,
    pub right_start: f64,
    pub pause_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollationParams {
    pub roomtone_source: RoomtoneSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roomtone_file_path: Option<String>,
    pub roomtone_level_db: f64,
    pub min_gap_ms: f64,
    pub max_gap_ms: f64,
    pub bridge_max_ms: f64,
    pub zipper_hysteresis_ms: f64,
    pub dedupe_within_overlap: bool,
    pub db_floor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomtoneSource {
    Auto,
    File,
}

impl Default for CollationParams {
    fn default() -> Self {
        Self {
            roomtone_source: RoomtoneSource::Auto,
            roomtone_file_path: None,
            roomtone_level_db: -50.0,
            min_gap_ms: 150.0,
            max_gap_ms: 4000.0,
            bridge_max_ms: 120.0,
            zipper_hysteresis_ms: 3.0,
            dedupe_within_overlap: true,
            db_floor: -50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollationLog {
    pub seams: Vec<SeamDecision>,
    pub duration_delta_sec: f64,
}
