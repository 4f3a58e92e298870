//! Silence detection stage (spec §4.2).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::PipelineError;
use crate::manifest::Manifest;
use crate::media::MediaTool;
use crate::model::{SilenceDetectParams, SilenceTimeline};
use crate::runner::{check_fingerprint, record_completed, StageOutcome};
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::workdir::{atomic_write, WorkDir};

const STAGE: &str = "timeline";

#[derive(Serialize)]
struct Inputs<'a> {
    audio_sha256: &'a str,
}

pub fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    audio_path: &str,
    audio_sha256: &str,
    params: SilenceDetectParams,
    media: &dyn MediaTool,
) -> Result<StageOutcome, PipelineError> {
    let ffmpeg_version = media.version()?;
    let mut tool_versions = BTreeMap::new();
    tool_versions.insert("ffmpeg".to_string(), ffmpeg_version.clone());

    let inputs = Inputs { audio_sha256 };
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, &inputs, &params, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let events = media.detect_silence(audio_path, params.db_floor, params.min_silence_dur)?;
    let mut sorted_events = events;
    sorted_events.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());

    let timeline = SilenceTimeline {
        audio_sha256: audio_sha256.to_string(),
        ffmpeg_version,
        params: params.clone(),
        events: sorted_events,
    };

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &params)?;
    write_meta(&stage_dir, &tool_versions)?;

    let timeline_path = stage_dir.join("silence.json");
    let text = crate::json_canon::canonical_pretty(&timeline)?;
    atomic_write(&timeline_path, text.as_bytes())?;

    write_status(&stage_dir, completed_status())?;

    let mut artifacts = BTreeMap::new();
    artifacts.insert("silence".to_string(), "silence.json".to_string());
    record_completed(manifest, STAGE, fp, artifacts);

    Ok(StageOutcome::Completed { artifacts: BTreeMap::from([("silence".to_string(), "silence.json".to_string())]) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::InputInfo;
    use crate::model::SilenceEvent;
    use tempfile::tempdir;

    struct FakeMedia {
        events: Vec<SilenceEvent>,
    }

    impl MediaTool for FakeMedia {
        fn detect_silence(&self, _: &str, _: f64, _: f64) -> Result<Vec<SilenceEvent>, PipelineError> {
            Ok(self.events.clone())
        }
        fn cut(&self, _: &str, _: f64, _: f64, _: &str) -> Result<(), PipelineError> {
            Ok(())
        }
        fn probe_duration(&self, _: &str) -> Result<f64, PipelineError> {
            Ok(21.0)
        }
        fn version(&self) -> Result<String, PipelineError> {
            Ok("ffmpeg version 6.0".to_string())
        }
        fn measure_window(&self, _: &str, _: f64, _: f64, _: Option<(f64, f64)>) -> Result<f64, PipelineError> {
            Ok(-60.0)
        }
        fn extract_room_tone(&self, _: &str, _: f64, _: f64, _: f64, output: &str) -> Result<(), PipelineError> {
            std::fs::write(output, b"RIFF-fake-roomtone")?;
            Ok(())
        }
        fn resample_room_tone(&self, _: &str, output: &str) -> Result<(), PipelineError> {
            std::fs::write(output, b"RIFF-fake-roomtone")?;
            Ok(())
        }
        fn apply_seam(&self, _: &str, _: &str, _: f64, _: f64, _: f64, _: f64, _: f64, _: f64, output: &str) -> Result<(), PipelineError> {
            std::fs::write(output, b"RIFF-fake-seam")?;
            Ok(())
        }
    }

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
    fn runs_then_skips_on_second_call() {
        let dir = tempdir().unwrap();
        let work_dir = WorkDir::explicit(dir.path().to_path_buf());
        let mut manifest = Manifest::new(sample_input());
        let media = FakeMedia { events: vec![SilenceEvent::new(10.0, 11.0)] };
        let params = SilenceDetectParams { db_floor: -35.0, min_silence_dur: 0.3 };

        let first = run(&work_dir, &mut manifest, "chapter.wav", "abc", params.clone(), &media).unwrap();
        assert!(matches!(first, StageOutcome::Completed { .. }));

        let second = run(&work_dir, &mut manifest, "chapter.wav", "abc", params, &media).unwrap();
        assert!(matches!(second, StageOutcome::Skipped));
    }
}
