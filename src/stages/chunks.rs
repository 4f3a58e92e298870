//! Chunk cutter stage (spec §4.4): sample-exact cuts at window boundaries.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::PipelineError;
use crate::json_canon::canonical_pretty;
use crate::manifest::Manifest;
use crate::media::MediaTool;
use crate::model::{ChunkEntry, ChunkIndex, WindowPlan};
use crate::runner::{check_fingerprint, record_completed, StageOutcome};
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::workdir::{atomic_write, WorkDir};

const STAGE: &str = "chunks";

#[derive(Serialize)]
struct Inputs<'a> {
    audio_sha256: &'a str,
    windows: &'a WindowPlan,
}

#[derive(Serialize, Clone)]
struct Params {}

fn sha256_file(path: &std::path::Path) -> Result<String, PipelineError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    audio_path: &str,
    audio_sha256: &str,
    plan: &WindowPlan,
    media: &dyn MediaTool,
) -> Result<StageOutcome, PipelineError> {
    let ffmpeg_version = media.version()?;
    let mut tool_versions = BTreeMap::new();
    tool_versions.insert("ffmpeg".to_string(), ffmpeg_version);

    let inputs = Inputs { audio_sha256, windows: plan };
    let params = Params {};
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, &inputs, &params, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &params)?;
    write_meta(&stage_dir, &tool_versions)?;

    let wav_dir = stage_dir.join("wav");
    std::fs::create_dir_all(&wav_dir)?;

    let total = plan.windows.len();
    let mut chunks = Vec::with_capacity(total);
    for (i, span) in plan.windows.iter().enumerate() {
        let id = ChunkIndex::id_for(i, total);
        let filename = format!("wav/{id}.wav");
        let output_path = wav_dir.join(format!("{id}.wav"));
        media.cut(audio_path, span.start, span.end, &output_path.to_string_lossy())?;
        let sha256 = sha256_file(&output_path)?;
        let duration_sec = media.probe_duration(&output_path.to_string_lossy())?;
        chunks.push(ChunkEntry { id, span: *span, filename, sha256, duration_sec });
    }
    chunks.sort_by(|a, b| a.span.start.partial_cmp(&b.span.start).unwrap());

    let index = ChunkIndex { chunks };
    let index_path = stage_dir.join("index.json");
    atomic_write(&index_path, canonical_pretty(&index)?.as_bytes())?;

    write_status(&stage_dir, completed_status())?;

    let artifacts = BTreeMap::from([("index".to_string(), "index.json".to_string())]);
    record_completed(manifest, STAGE, fp, artifacts.clone());
    Ok(StageOutcome::Completed { artifacts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::InputInfo;
    use crate::model::PlannedWindow;
    use tempfile::tempdir;

    struct FakeMedia;

    impl MediaTool for FakeMedia {
        fn detect_silence(&self, _: &str, _: f64, _: f64) -> Result<Vec<crate::model::SilenceEvent>, PipelineError> {
            Ok(vec![])
        }
        fn cut(&self, _: &str, _: f64, _: f64, output: &str) -> Result<(), PipelineError> {
            std::fs::write(output, b"RIFF-fake-wav-bytes")?;
            Ok(())
        }
        fn probe_duration(&self, _: &str) -> Result<f64, PipelineError> {
            Ok(10.5)
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
    fn cuts_two_chunks_with_stable_ids() {
        let dir = tempdir().unwrap();
        let work_dir = WorkDir::explicit(dir.path().to_path_buf());
        let mut manifest = Manifest::new(sample_input());
        let plan = WindowPlan {
            windows: vec![
                PlannedWindow { start: 0.0, end: 10.5 },
                PlannedWindow { start: 10.5, end: 21.0 },
            ],
            params: crate::model::PlanParams { min: 5.0, max: 15.0, target: 10.0, strict_tail: false },
            total_cost: 0.0,
            tail_relaxed: false,
        };

        let media = FakeMedia;
        let outcome = run(&work_dir, &mut manifest, "chapter.wav", "abc", &plan, &media).unwrap();
        assert!(matches!(outcome, StageOutcome::Completed { .. }));

        let text = std::fs::read_to_string(dir.path().join("chunks/index.json")).unwrap();
        let index: ChunkIndex = serde_json::from_str(&text).unwrap();
        assert_eq!(index.chunks.len(), 2);
        assert_eq!(index.chunks[0].id, "chunk_001");
        assert_eq!(index.chunks[1].id, "chunk_002");
    }
}
