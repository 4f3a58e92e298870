//! Window planning stage (spec §4.3): wraps [`crate::algo::dp_segment`].

use std::collections::BTreeMap;

use serde::Serialize;

use crate::algo::plan_windows;
use crate::error::PipelineError;
use crate::json_canon::canonical_pretty;
use crate::manifest::Manifest;
use crate::model::{PlanParams, SilenceTimeline, WindowPlan};
use crate::runner::{check_fingerprint, record_completed, StageOutcome};
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::workdir::{atomic_write, WorkDir};

const STAGE: &str = "plan";

#[derive(Serialize)]
struct Inputs<'a> {
    duration_sec: f64,
    midpoints: &'a [f64],
}

pub fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    duration_sec: f64,
    timeline: &SilenceTimeline,
    params: PlanParams,
) -> Result<StageOutcome, PipelineError> {
    let midpoints = timeline.midpoints();
    let tool_versions = BTreeMap::new();

    let inputs = Inputs { duration_sec, midpoints: &midpoints };
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, &inputs, &params, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let plan: WindowPlan = plan_windows(duration_sec, &midpoints, &params)?;

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &params)?;
    write_meta(&stage_dir, &tool_versions)?;

    let path = stage_dir.join("windows.json");
    atomic_write(&path, canonical_pretty(&plan)?.as_bytes())?;

    write_status(&stage_dir, completed_status())?;

    let artifacts = BTreeMap::from([("windows".to_string(), "windows.json".to_string())]);
    record_completed(manifest, STAGE, fp, artifacts.clone());

    Ok(StageOutcome::Completed { artifacts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::InputInfo;
    use crate::model::{SilenceDetectParams, SilenceEvent};
    use tempfile::tempdir;

    fn sample_input() -> InputInfo {
        InputInfo {
            path: "chapter.wav".to_string(),
            sha256: "abc".to_string(),
            duration_sec: 21.0,
            size_bytes: 100,
            mtime_utc: chrono::Utc::now(),
        }
    }

    #[test]
    fn plans_two_windows_around_the_silence_midpoint() {
        let dir = tempdir().unwrap();
        let work_dir = WorkDir::explicit(dir.path().to_path_buf());
        let mut manifest = Manifest::new(sample_input());
        let timeline = SilenceTimeline {
            audio_sha256: "abc".to_string(),
            ffmpeg_version: "6.0".to_string(),
            params: SilenceDetectParams { db_floor: -35.0, min_silence_dur: 0.3 },
            events: vec![SilenceEvent::new(10.0, 11.0)],
        };
        let params = PlanParams { min: 5.0, max: 15.0, target: 10.0, strict_tail: false };

        let outcome = run(&work_dir, &mut manifest, 21.0, &timeline, params).unwrap();
        assert!(matches!(outcome, StageOutcome::Completed { .. }));

        let text = std::fs::read_to_string(dir.path().join("plan/windows.json")).unwrap();
        let plan: WindowPlan = serde_json::from_str(&text).unwrap();
        assert_eq!(plan.windows.len(), 2);
        assert_eq!(plan.windows[0].start, 0.0);
        assert_eq!(plan.windows[1].end, 21.0);
    }
}
