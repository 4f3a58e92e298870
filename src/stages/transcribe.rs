//! ASR transcription stage (spec §4.5): per-chunk HTTP calls plus a
//! chapter-rebased merge.
//!
//! Per-chunk work is independent (each unit reads one chunk WAV and writes
//! one transcript file), so it runs under a bounded `jobs` semaphore per
//! spec §5's "per-unit work... may run with bounded parallelism". Each
//! in-flight call races the shared [`CancellationToken`] so a cancellation
//! request cuts short whichever chunks are still waiting on the network
//! instead of letting the whole stage drain first.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::CancellationToken;
use crate::error::PipelineError;
use crate::json_canon::canonical_pretty;
use crate::manifest::Manifest;
use crate::model::transcript::rebase;
use crate::model::{ChunkEntry, ChunkIndex, MergedTranscript, MergedWord, Transcript};
use crate::runner::{check_fingerprint, record_completed, StageOutcome};
use crate::services::asr::{AsrClient, VersionResponse};
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::workdir::{atomic_write, WorkDir};

const STAGE: &str = "transcripts";

#[derive(Serialize, Clone)]
struct Params<'a> {
    language: &'a str,
}

#[derive(Serialize)]
struct Inputs<'a> {
    chunk_shas: Vec<&'a str>,
}

struct ChunkResult {
    index: usize,
    chunk_id: String,
    rel_path: String,
    transcript: Transcript,
}

/// Transcribes one chunk: cancellation is checked before the call is even
/// issued, then raced against it for the duration of the HTTP request.
async fn transcribe_one(
    position: usize,
    chunk: ChunkEntry,
    client: AsrClient,
    wav_dir: std::path::PathBuf,
    stage_dir: std::path::PathBuf,
    cancel: CancellationToken,
) -> Result<ChunkResult, PipelineError> {
    cancel.check()?;
    let audio_path = wav_dir.join(&chunk.filename).to_string_lossy().into_owned();

    let resp = tokio::select! {
        r = client.transcribe(&audio_path) => r.map_err(|e| PipelineError::ServiceUnavailable(e.to_string()))?,
        _ = cancel.cancelled() => return Err(PipelineError::CancellationRequested),
    };

    let transcript = Transcript {
        chunk_id: chunk.id.clone(),
        text: resp.text,
        words: resp.words,
        duration_sec: resp.duration_sec,
        tool_versions: resp.tool_versions,
        generated_at: chrono::Utc::now(),
    };

    let rel = format!("{}.json", chunk.id);
    atomic_write(&stage_dir.join(&rel), canonical_pretty(&transcript)?.as_bytes())?;

    Ok(ChunkResult { index: position, chunk_id: chunk.id, rel_path: rel, transcript })
}

/// Runs the ASR adapter over every chunk in `index`, at most `jobs` chunks
/// in flight at once. A failed health check is fatal; a chunk returning a
/// retryable HTTP status is retried inside [`AsrClient::transcribe`], and a
/// non-retryable failure is fatal for the whole stage (spec §4.5).
pub async fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    index: &ChunkIndex,
    client: &AsrClient,
    wav_dir: &std::path::Path,
    jobs: usize,
    cancel: &CancellationToken,
) -> Result<StageOutcome, PipelineError> {
    let healthy = client
        .health()
        .await
        .map_err(|e| PipelineError::ServiceUnavailable(e.to_string()))?;
    if !healthy {
        return Err(PipelineError::ServiceUnavailable("ASR service health check failed".to_string()));
    }
    let version: VersionResponse = client
        .version()
        .await
        .map_err(|e| PipelineError::ServiceUnavailable(e.to_string()))?;
    let mut tool_versions = BTreeMap::new();
    tool_versions.insert(version.service, version.version);

    let chunk_shas: Vec<&str> = index.chunks.iter().map(|c| c.sha256.as_str()).collect();
    let inputs = Inputs { chunk_shas };
    let params = Params { language: "en" };
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, &inputs, &params, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &params)?;
    write_meta(&stage_dir, &tool_versions)?;

    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut set = JoinSet::new();
    for (position, chunk) in index.chunks.iter().cloned().enumerate() {
        cancel.check()?;
        let permit_guard = semaphore.clone();
        let client = client.clone();
        let wav_dir = wav_dir.to_path_buf();
        let stage_dir = stage_dir.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            let _permit = permit_guard.acquire_owned().await.expect("semaphore never closed");
            transcribe_one(position, chunk, client, wav_dir, stage_dir, cancel).await
        });
    }

    let mut results: Vec<Option<ChunkResult>> = (0..index.chunks.len()).map(|_| None).collect();
    let mut first_error: Option<PipelineError> = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(result)) => {
                let slot = result.index;
                results[slot] = Some(result);
            }
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
                set.abort_all();
            }
            Err(join_err) => {
                if !join_err.is_cancelled() && first_error.is_none() {
                    first_error = Some(PipelineError::ServiceUnavailable(format!("transcription task panicked: {join_err}")));
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let mut merged_words: Vec<MergedWord> = Vec::new();
    let mut merged_text_parts: Vec<String> = Vec::new();
    let mut per_chunk_paths = BTreeMap::new();

    for (chunk, result) in index.chunks.iter().zip(results.into_iter()) {
        let result = result.expect("every chunk position is filled or the stage already returned an error");
        per_chunk_paths.insert(result.chunk_id, result.rel_path);
        merged_text_parts.push(result.transcript.text.clone());
        merged_words.extend(rebase(&result.transcript, chunk.span.start));
    }

    let index_path_text = canonical_pretty(&per_chunk_paths)?;
    atomic_write(&stage_dir.join("index.json"), index_path_text.as_bytes())?;

    let merged = MergedTranscript { words: merged_words, text: merged_text_parts.join(" ") };
    atomic_write(&stage_dir.join("merged.json"), canonical_pretty(&merged)?.as_bytes())?;

    write_status(&stage_dir, completed_status())?;

    let mut artifacts = per_chunk_paths.clone();
    artifacts.insert("index".to_string(), "index.json".to_string());
    artifacts.insert("merged".to_string(), "merged.json".to_string());
    record_completed(manifest, STAGE, fp, artifacts.clone());
    Ok(StageOutcome::Completed { artifacts })
}
