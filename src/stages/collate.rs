//! Collator ("seam zipper") stage (spec §4.10): replaces inter-sentence
//! gaps and bridgeable chunk-boundary slivers with room tone, using an
//! HF-probe-driven nudging loop to pick cut points that avoid fricative
//! onsets, then an equal-power crossfade to render each seam.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::PipelineError;
use crate::json_canon::canonical_pretty;
use crate::manifest::Manifest;
use crate::media::{MediaTool, ProbeReading};
use crate::model::collation::{
    CollationLog, CollationParams, CollationSegments, Replacement, ReplacementKind, RoomtoneSource, SeamDecision,
};
use crate::model::sentence::RefinedSentence;
use crate::model::plan::WindowPlan;
use crate::runner::{check_fingerprint, record_completed, StageOutcome};
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::workdir::{atomic_write, WorkDir};

const STAGE: &str = "collate";

/// High-frequency probe band (spec §4.10 step 3).
const HF_BAND_LOW: f64 = 3_500.0;
const HF_BAND_HIGH: f64 = 12_000.0;
const HF_MARGIN_DB: f64 = 5.0;
const WEAK_MARGIN_DB: f64 = 2.5;
const MAX_LEFT_NUDGES: u32 = 8;
const MAX_RIGHT_NUDGES: u32 = 3;
const NUDGE_STEP_SEC: f64 = 0.003;
const PROBE_WINDOW_SEC: f64 = 0.08;
const FADE_SEC_DEFAULT: f64 = 0.005;
const GUARD_HOT_L: f64 = 0.012;
const GUARD_HOT_R: f64 = 0.015;
const MONOTONIC_GUARD_DB: f64 = 0.5;

#[derive(Serialize)]
struct Inputs<'a> {
    sentence_count: usize,
    audio_sha256: &'a str,
}

/// A measured edge and whether it is classified "hot" (spec §4.10 step 3):
/// `band > dbFloor AND delta >= HfMarginDb`, with weak-hot deltas
/// (`< WeakMarginDb`) always treated as cold — a hysteresis guard against
/// chasing noise near the margin.
fn is_hot(reading: &ProbeReading, db_floor: f64) -> bool {
    let delta = reading.delta_db();
    if delta < WEAK_MARGIN_DB {
        return false;
    }
    reading.band_db > db_floor && delta >= HF_MARGIN_DB
}

/// Something that can measure band/full-band RMS over an arbitrary window
/// of the seam's current (reconstructed) audio. Narrower than
/// [`MediaTool`] so the nudging loop is unit-testable without ffmpeg.
pub trait SeamProbe {
    fn measure(&self, start: f64, end: f64) -> Result<ProbeReading, PipelineError>;
}

pub struct MediaSeamProbe<'a> {
    pub media: &'a dyn MediaTool,
    pub audio_path: &'a str,
}

impl SeamProbe for MediaSeamProbe<'_> {
    fn measure(&self, start: f64, end: f64) -> Result<ProbeReading, PipelineError> {
        let band_db = self.media.measure_window(self.audio_path, start, end, Some((HF_BAND_LOW, HF_BAND_HIGH)))?;
        let full_db = self.media.measure_window(self.audio_path, start, end, None)?;
        Ok(ProbeReading { band_db, full_db })
    }
}

struct NudgeResult {
    ta: f64,
    tb: f64,
    hf_left: bool,
    hf_right: bool,
    left_nudges: u32,
    right_nudges: u32,
}

/// Iteratively adjust `(ta, tb)` away from hot fricative energy (spec
/// §4.10 step 3). Terminates honestly at the nudge caps even when a side
/// never cools (Testable Property 11).
fn nudge_seam(probe: &dyn SeamProbe, ta0: f64, tb0: f64, db_floor: f64) -> Result<NudgeResult, PipelineError> {
    let mut ta = ta0;
    let tb = tb0;
    let mut left_nudges = 0u32;

    let mut prev = probe.measure(ta - PROBE_WINDOW_SEC, ta)?;
    let mut hf_left = is_hot(&prev, db_floor);
    while hf_left && left_nudges < MAX_LEFT_NUDGES && ta + NUDGE_STEP_SEC < tb {
        let candidate_ta = ta + NUDGE_STEP_SEC;
        let reading = probe.measure(candidate_ta - PROBE_WINDOW_SEC, candidate_ta)?;
        if reading.band_db > prev.band_db + MONOTONIC_GUARD_DB {
            // Worsening audio: never chase it further.
            break;
        }
        ta = candidate_ta;
        left_nudges += 1;
        prev = reading;
        hf_left = is_hot(&prev, db_floor);
    }

    let mut tb = tb;
    let mut right_nudges = 0u32;
    let mut prev_r = probe.measure(tb, tb + PROBE_WINDOW_SEC)?;
    let mut hf_right = is_hot(&prev_r, db_floor);
    while hf_right && right_nudges < MAX_RIGHT_NUDGES {
        let candidate_tb = tb + NUDGE_STEP_SEC;
        prev_r = probe.measure(candidate_tb, candidate_tb + PROBE_WINDOW_SEC)?;
        tb = candidate_tb;
        right_nudges += 1;
        hf_right = is_hot(&prev_r, db_floor);
    }

    Ok(NudgeResult { ta, tb, hf_left, hf_right, left_nudges, right_nudges })
}

struct FadeGeometry {
    fade_l: f64,
    fade_r: f64,
    guard_r_effective: f64,
}

/// Fade geometry from spec §4.10 step 4: risky sides (still hot, or any
/// nudges occurred) get the wider guard fade; pause-too-short seams scale
/// both fades down proportionally so they never exceed the pause.
fn fade_geometry(ta: f64, tb: f64, nudge: &NudgeResult) -> FadeGeometry {
    let left_risky = nudge.hf_left || nudge.left_nudges > 0;
    let right_risky = nudge.hf_right || nudge.right_nudges > 0;

    let mut fade_l = FADE_SEC_DEFAULT;
    if left_risky {
        fade_l = fade_l.max(GUARD_HOT_L);
    }
    let mut fade_r = FADE_SEC_DEFAULT;
    let guard_r_effective = if right_risky { GUARD_HOT_R } else { 0.0 };
    if right_risky {
        fade_r = fade_r.max(GUARD_HOT_R);
    }

    let pause = tb - ta;
    if pause <= 0.001 || fade_l + fade_r > pause - 0.001 {
        let scale = ((pause - 0.001) / (fade_l + fade_r)).clamp(0.0, 1.0);
        fade_l *= scale;
        fade_r *= scale;
    }

    FadeGeometry { fade_l, fade_r, guard_r_effective }
}

/// Inter-sentence gaps in `[minGapMs, maxGapMs]` (spec §4.10 step 2).
fn gap_seams(sentences: &[RefinedSentence], min_gap_ms: f64, max_gap_ms: f64) -> Vec<(f64, f64, ReplacementKind)> {
    let min_gap = min_gap_ms / 1000.0;
    let max_gap = max_gap_ms / 1000.0;
    sentences
        .windows(2)
        .filter_map(|w| {
            let gap = w[1].start - w[0].end;
            if gap >= min_gap && gap <= max_gap {
                Some((w[0].end, w[1].start, ReplacementKind::Gap))
            } else {
                None
            }
        })
        .collect()
}

/// Sentences that straddle a chunk boundary with both slivers `<=
/// bridgeMaxMs` become a whole-sentence `boundary_sliver` seam (spec
/// §4.10 step 2).
fn boundary_sliver_seams(
    sentences: &[RefinedSentence],
    chunk_boundaries: &[f64],
    bridge_max_ms: f64,
) -> Vec<(f64, f64, ReplacementKind)> {
    let bridge_max = bridge_max_ms / 1000.0;
    let mut seams = Vec::new();
    for s in sentences {
        for &cb in chunk_boundaries {
            if cb > s.start && cb < s.end {
                let left = cb - s.start;
                let right = s.end - cb;
                if left <= bridge_max && right <= bridge_max {
                    seams.push((s.start, s.end, ReplacementKind::BoundarySliver));
                }
            }
        }
    }
    seams
}

fn chunk_boundaries(plan: &WindowPlan) -> Vec<f64> {
    plan.windows.windows(2).map(|w| w[0].end).collect()
}

pub struct CollateInputs<'a> {
    pub sentences: &'a [RefinedSentence],
    pub plan: &'a WindowPlan,
    pub audio_path: &'a str,
    pub audio_sha256: &'a str,
    pub total_duration: f64,
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    inputs: &CollateInputs,
    params: CollationParams,
    media: &dyn MediaTool,
) -> Result<StageOutcome, PipelineError> {
    let ffmpeg_version = media.version()?;
    let mut tool_versions = BTreeMap::new();
    tool_versions.insert("ffmpeg".to_string(), ffmpeg_version);

    let fp_inputs = Inputs { sentence_count: inputs.sentences.len(), audio_sha256: inputs.audio_sha256 };
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, &fp_inputs, &params, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &params)?;
    write_meta(&stage_dir, &tool_versions)?;

    let tmp_dir = stage_dir.join("tmp");
    std::fs::create_dir_all(&tmp_dir)?;

    // Step 1: room-tone source.
    let room_tone_path = tmp_dir.join("roomtone.wav").to_string_lossy().into_owned();
    match params.roomtone_source {
        RoomtoneSource::Auto => {
            let probe_start = inputs.total_duration * 0.10;
            media.extract_room_tone(inputs.audio_path, probe_start, 5.0, params.roomtone_level_db, &room_tone_path)?;
        }
        RoomtoneSource::File => {
            let src = params
                .roomtone_file_path
                .as_deref()
                .ok_or_else(|| PipelineError::InvalidInput("roomtoneSource=file requires roomtoneFilePath".to_string()))?;
            media.resample_room_tone(src, &room_tone_path)?;
        }
    }

    // Step 2: seam identification, sorted left-to-right; later seams act
    // on the output of earlier ones (spec §4.10 step 2).
    let mut seams = gap_seams(inputs.sentences, params.min_gap_ms, params.max_gap_ms);
    seams.extend(boundary_sliver_seams(inputs.sentences, &chunk_boundaries(inputs.plan), params.bridge_max_ms));
    seams.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    if params.dedupe_within_overlap {
        let hysteresis = params.zipper_hysteresis_ms / 1000.0;
        let mut deduped: Vec<(f64, f64, ReplacementKind)> = Vec::new();
        for seam in seams {
            if deduped
                .last()
                .map(|prev: &(f64, f64, ReplacementKind)| seam.0 < prev.1 + hysteresis)
                .unwrap_or(false)
            {
                continue;
            }
            deduped.push(seam);
        }
        seams = deduped;
    }

    let mut current_path = inputs.audio_path.to_string();
    let mut replacements = Vec::with_capacity(seams.len());
    let mut decisions = Vec::with_capacity(seams.len());

    for (i, (ta0, tb0, kind)) in seams.iter().enumerate() {
        let probe = MediaSeamProbe { media, audio_path: &current_path };
        let nudge = nudge_seam(&probe, *ta0, *tb0, params.db_floor)?;
        let geometry = fade_geometry(nudge.ta, nudge.tb, &nudge);

        let right_start = nudge.tb - geometry.guard_r_effective;
        let pause = nudge.tb - nudge.ta;
        let room_tone_len = pause + geometry.fade_r;

        let seam_output = tmp_dir.join(format!("seam_{:04}.wav", i + 1)).to_string_lossy().into_owned();
        media.apply_seam(
            &current_path,
            &room_tone_path,
            nudge.ta,
            room_tone_len,
            right_start,
            inputs.total_duration,
            geometry.fade_l,
            geometry.fade_r,
            &seam_output,
        )?;
        current_path = seam_output;

        replacements.push(Replacement {
            kind: *kind,
            from: nudge.ta,
            to: nudge.tb,
            duration: pause,
            level_db: params.roomtone_level_db,
        });
        decisions.push(SeamDecision {
            from: nudge.ta,
            to: nudge.tb,
            fade_l: geometry.fade_l,
            fade_r: geometry.fade_r,
            hf_left: nudge.hf_left,
            hf_right: nudge.hf_right,
            left_nudges: nudge.left_nudges,
            right_nudges: nudge.right_nudges,
            right_start,
            pause_ms: pause * 1000.0,
        });
    }

    // Step 6: verify duration delta; warn only (hard gate lives in validate).
    let final_duration = media.probe_duration(&current_path)?;
    let duration_delta_sec = final_duration - inputs.total_duration;
    if duration_delta_sec.abs() > 0.010 {
        tracing::warn!(
            delta_sec = duration_delta_sec,
            "collation output duration drifted from input by more than 10ms"
        );
    }

    let final_path = stage_dir.join("final.wav");
    std::fs::copy(&current_path, &final_path)?;

    let segments = CollationSegments { sentences: inputs.sentences.to_vec(), replacements };
    let log = CollationLog { seams: decisions, duration_delta_sec };

    atomic_write(&stage_dir.join("segments.json"), canonical_pretty(&segments)?.as_bytes())?;
    atomic_write(&stage_dir.join("map.json"), canonical_pretty(&log.seams)?.as_bytes())?;
    atomic_write(&stage_dir.join("log.json"), canonical_pretty(&log)?.as_bytes())?;

    write_status(&stage_dir, completed_status())?;

    let artifacts = BTreeMap::from([
        ("final".to_string(), "final.wav".to_string()),
        ("segments".to_string(), "segments.json".to_string()),
        ("map".to_string(), "map.json".to_string()),
        ("log".to_string(), "log.json".to_string()),
    ]);
    record_completed(manifest, STAGE, fp, artifacts.clone());
    Ok(StageOutcome::Completed { artifacts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sentence::SentenceSource;

    fn sentence(id: &str, start: f64, end: f64) -> RefinedSentence {
        RefinedSentence { id: id.to_string(), start, end, start_word_idx: None, end_word_idx: None, source: SentenceSource::AeneasNoSnap }
    }

    #[test]
    fn gap_seam_within_bounds_is_selected() {
        let sentences = vec![sentence("s1", 0.0, 5.0), sentence("s2", 5.3, 9.0)];
        let seams = gap_seams(&sentences, 150.0, 4000.0);
        assert_eq!(seams, vec![(5.0, 5.3, ReplacementKind::Gap)]);
    }

    #[test]
    fn gap_below_min_is_excluded() {
        let sentences = vec![sentence("s1", 0.0, 5.0), sentence("s2", 5.05, 9.0)];
        let seams = gap_seams(&sentences, 150.0, 4000.0);
        assert!(seams.is_empty());
    }

    #[test]
    fn boundary_sliver_requires_both_slivers_within_bridge_max() {
        let sentences = vec![sentence("s1", 9.9, 10.2)];
        let seams = boundary_sliver_seams(&sentences, &[10.0], 200.0);
        assert_eq!(seams, vec![(9.9, 10.2, ReplacementKind::BoundarySliver)]);
    }

    #[test]
    fn boundary_sliver_rejected_when_one_side_too_wide() {
        let sentences = vec![sentence("s1", 9.0, 10.2)];
        let seams = boundary_sliver_seams(&sentences, &[10.0], 200.0);
        assert!(seams.is_empty());
    }

    struct FakeProbe {
        left_band_db: f64,
        left_full_db: f64,
        right_band_db: f64,
        right_full_db: f64,
    }

    impl SeamProbe for FakeProbe {
        fn measure(&self, start: f64, _end: f64) -> Result<ProbeReading, PipelineError> {
            // Distinguish left-edge probes (negative/earlier windows) from
            // right-edge probes by comparing against a threshold; tests
            // construct start times on either side of a fixed pivot.
            if start < 100.0 {
                Ok(ProbeReading { band_db: self.left_band_db, full_db: self.left_full_db })
            } else {
                Ok(ProbeReading { band_db: self.right_band_db, full_db: self.right_full_db })
            }
        }
    }

    #[test]
    fn cold_seam_uses_default_fade_and_no_nudges() {
        let probe = FakeProbe { left_band_db: -50.0, left_full_db: -45.0, right_band_db: -50.0, right_full_db: -45.0 };
        let nudge = nudge_seam(&probe, 5.0, 6.0, -50.0).unwrap();
        assert_eq!(nudge.left_nudges, 0);
        assert_eq!(nudge.right_nudges, 0);
        assert!(!nudge.hf_left && !nudge.hf_right);

        let geometry = fade_geometry(nudge.ta, nudge.tb, &nudge);
        assert_eq!(geometry.fade_l, FADE_SEC_DEFAULT);
        assert_eq!(geometry.fade_r, FADE_SEC_DEFAULT);
        assert_eq!(geometry.guard_r_effective, 0.0);
    }

    #[test]
    fn left_side_that_never_cools_terminates_honestly_at_the_cap() {
        // Always hot, never changing loudness, so the monotonic guard
        // never fires and the loop must run to the nudge cap.
        let probe = FakeProbe { left_band_db: -10.0, left_full_db: -20.0, right_band_db: -50.0, right_full_db: -45.0 };
        let nudge = nudge_seam(&probe, 5.0, 6.0, -50.0).unwrap();
        assert_eq!(nudge.left_nudges, MAX_LEFT_NUDGES);
        assert!(nudge.hf_left);
    }

    #[test]
    fn risky_side_widens_to_the_guard_fade() {
        let probe = FakeProbe { left_band_db: -10.0, left_full_db: -20.0, right_band_db: -50.0, right_full_db: -45.0 };
        let nudge = nudge_seam(&probe, 5.0, 6.0, -50.0).unwrap();
        let geometry = fade_geometry(nudge.ta, nudge.tb, &nudge);
        assert_eq!(geometry.fade_l, GUARD_HOT_L);
        assert_eq!(geometry.guard_r_effective, 0.0);
    }

    #[test]
    fn short_pause_scales_both_fades_down() {
        let nudge = NudgeResult { ta: 5.0, tb: 5.02, hf_left: true, hf_right: true, left_nudges: 1, right_nudges: 1 };
        let geometry = fade_geometry(nudge.ta, nudge.tb, &nudge);
        assert!(geometry.fade_l + geometry.fade_r <= (nudge.tb - nudge.ta) - 0.001 + 1e-9);
    }
}
