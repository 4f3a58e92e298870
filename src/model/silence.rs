//! Silence timeline artifact (spec §3, §4.2).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceDetectParams {
    pub db_floor: f64,
    pub min_silence_dur: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SilenceEvent {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub mid: f64,
}

impl SilenceEvent {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            duration: end - start,
            mid: (start + end) / 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceTimeline {
    pub audio_sha256: String,
    pub ffmpeg_version: String,
    pub params: SilenceDetectParams,
    pub events: Vec<SilenceEvent>,
}

impl SilenceTimeline {
    /// Silence midpoints, sorted, the window planner's only input besides
    /// chapter duration and its own params (spec §4.3).
    pub fn midpoints(&self) -> Vec<f64> {
        let mut mids: Vec<f64> = self.events.iter().map(|e| e.mid).collect();
        mids.sort_by(|a, b| a.partial_cmp(b).unwrap());
        mids
    }
}
