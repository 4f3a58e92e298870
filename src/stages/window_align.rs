//! Window-align adapter stage (spec §4.8): per-window forced alignment
//! inside anchor guards.
//!
//! Windows are independent units of work (each slices its own audio span
//! and writes its own artifact file), so they run under a bounded `jobs`
//! semaphore per spec §5, with each in-flight aligner call raced against
//! the shared [`CancellationToken`] the same way `transcribe.rs` does.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::cancel::CancellationToken;
use crate::error::PipelineError;
use crate::json_canon::{canonical_pretty, round6};
use crate::manifest::Manifest;
use crate::media::MediaTool;
use crate::model::alignment::{Fragment, FragmentWordRange, WindowAlignment};
use crate::model::book::BookSentence;
use crate::model::windows::{BuiltWindow, WindowsArtifact};
use crate::model::BookIndex;
use crate::runner::{check_fingerprint, record_completed, StageOutcome};
use crate::services::aligner::AlignerClient;
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::workdir::{atomic_write, normalize_path, WorkDir};

const STAGE: &str = "window-align";

#[derive(Serialize, Clone)]
struct Params<'a> {
    language: &'a str,
}

#[derive(Serialize)]
struct Inputs<'a> {
    window_ids: Vec<&'a str>,
    windows_hash: String,
}

/// Clip fragments so they stay within `[0, window_duration]` and never
/// backtrack, enforcing "hard monotone" / "anchors immutable" (spec §4.8).
/// Book sentences entirely contained in `[book_start, book_end)`: one
/// aligner line per sentence, so the response carries one fragment per
/// sentence rather than one per window. A sentence straddling a window
/// boundary is picked up whole by whichever window contains it entirely
/// (spec §9 Open Question: window boundaries are anchor/pad-derived, not
/// sentence-aligned, so a sentence can in principle span two windows; in
/// practice `padSec` is chosen large enough relative to sentence length
/// that this is rare, and the refiner's overlap-fix pass absorbs the rest).
fn sentence_lines(book: &BookIndex, book_start: usize, book_end: usize) -> Vec<(BookSentence, String)> {
    book.sentences
        .iter()
        .filter(|s| s.range.start >= book_start && s.range.end < book_end)
        .map(|s| {
            let text = book.words[s.range.start..=s.range.end]
                .iter()
                .map(|w| w.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            (s.clone(), text)
        })
        .collect()
}

fn clip_fragments(mut fragments: Vec<Fragment>, window_duration: f64) -> Vec<Fragment> {
    let mut floor = 0.0f64;
    for f in fragments.iter_mut() {
        let begin = round6(f.begin.max(floor).min(window_duration));
        let end = round6(f.end.max(begin).min(window_duration));
        f.begin = begin;
        f.end = end;
        floor = end;
    }
    fragments
}

/// Aligns one window: slices its audio span, calls the aligner unless the
/// window has no sentences, clips fragments to monotone bounds, and writes
/// the per-window artifact. Cancellation is checked before the slice is
/// even cut, then raced against the aligner call itself.
async fn align_one(
    window: BuiltWindow,
    book: Arc<BookIndex>,
    audio_path: Arc<str>,
    client: AlignerClient,
    media: Arc<dyn MediaTool>,
    language: Arc<str>,
    tmp_dir: std::path::PathBuf,
    stage_dir: std::path::PathBuf,
    cancel: CancellationToken,
) -> Result<(String, String), PipelineError> {
    cancel.check()?;
    let sentences = sentence_lines(&book, window.book_start, window.book_end.min(book.words.len()));
    let lines: Vec<String> = sentences.iter().map(|(_, text)| text.clone()).collect();

    let offset_sec = book.word_time_estimate(window.book_start);
    let end_sec = book.word_time_estimate(window.book_end.min(book.totals.words.saturating_sub(1)));
    let window_duration = (end_sec - offset_sec).max(0.0);

    let slice_path = tmp_dir.join(format!("{}.wav", window.id));
    media.cut(&audio_path, offset_sec, end_sec, &slice_path.to_string_lossy())?;
    let normalized = normalize_path(&slice_path);

    let (fragments, tool) = if lines.is_empty() {
        (Vec::new(), crate::services::aligner::ToolInfo { name: None, version: None })
    } else {
        let resp = tokio::select! {
            r = client.align_chunk(&window.id, &normalized, &lines) => r.map_err(|e| PipelineError::ServiceUnavailable(e.to_string()))?,
            _ = cancel.cancelled() => return Err(PipelineError::CancellationRequested),
        };
        (clip_fragments(resp.fragments, window_duration), resp.tool)
    };
    let fragment_word_ranges = sentences
        .iter()
        .map(|(s, _)| FragmentWordRange { start_word_idx: s.range.start, end_word_idx: s.range.end })
        .collect();

    let joined_lines = lines.join("\n");
    let mut digest = Sha256::new();
    digest.update(joined_lines.as_bytes());
    let text_digest = hex::encode(digest.finalize());

    let alignment = WindowAlignment {
        window_id: window.id.clone(),
        offset_sec: round6(offset_sec),
        language: language.to_string(),
        text_digest,
        fragments,
        fragment_word_ranges,
        tool_versions: BTreeMap::from([(
            tool.name.unwrap_or_else(|| "aligner".to_string()),
            tool.version.unwrap_or_else(|| "unknown".to_string()),
        )]),
        generated_at: chrono::Utc::now(),
    };

    let rel = format!("{}.aeneas.json", window.id);
    atomic_write(&stage_dir.join(&rel), canonical_pretty(&alignment)?.as_bytes())?;
    Ok((window.id, rel))
}

#[allow(clippy::too_many_arguments)]
pub async fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    book: &BookIndex,
    windows: &WindowsArtifact,
    audio_path: &str,
    client: &AlignerClient,
    media: Arc<dyn MediaTool>,
    language: &str,
    jobs: usize,
    cancel: &CancellationToken,
) -> Result<StageOutcome, PipelineError> {
    let tool_versions = BTreeMap::new();
    let window_ids: Vec<&str> = windows.windows.iter().map(|w| w.id.as_str()).collect();
    let windows_json = serde_json::to_string(&windows.windows).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(windows_json.as_bytes());
    let windows_hash = hex::encode(hasher.finalize());

    let inputs = Inputs { window_ids, windows_hash };
    let params = Params { language };
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, &inputs, &params, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &params)?;
    write_meta(&stage_dir, &tool_versions)?;

    let tmp_dir = stage_dir.join("tmp");
    std::fs::create_dir_all(&tmp_dir)?;

    let book_arc = Arc::new(book.clone());
    let audio_path_arc: Arc<str> = Arc::from(audio_path);
    let language_arc: Arc<str> = Arc::from(language);
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut set = JoinSet::new();

    for window in windows.windows.iter().cloned() {
        cancel.check()?;
        let permit_guard = semaphore.clone();
        let book = book_arc.clone();
        let audio_path = audio_path_arc.clone();
        let client = client.clone();
        let media = media.clone();
        let language = language_arc.clone();
        let tmp_dir = tmp_dir.clone();
        let stage_dir = stage_dir.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            let _permit = permit_guard.acquire_owned().await.expect("semaphore never closed");
            align_one(window, book, audio_path, client, media, language, tmp_dir, stage_dir, cancel).await
        });
    }

    let mut artifacts = BTreeMap::new();
    let mut first_error: Option<PipelineError> = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok((window_id, rel))) => {
                artifacts.insert(window_id, rel);
            }
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
                set.abort_all();
            }
            Err(join_err) => {
                if !join_err.is_cancelled() && first_error.is_none() {
                    first_error = Some(PipelineError::ServiceUnavailable(format!("window-align task panicked: {join_err}")));
                }
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let index_text = canonical_pretty(&artifacts)?;
    atomic_write(&stage_dir.join("index.json"), index_text.as_bytes())?;
    artifacts.insert("index".to_string(), "index.json".to_string());

    write_status(&stage_dir, completed_status())?;
    record_completed(manifest, STAGE, fp, artifacts.clone());
    Ok(StageOutcome::Completed { artifacts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clips_backtracking_fragments_to_monotone() {
        let fragments = vec![
            Fragment { begin: 0.0, end: 1.0 },
            Fragment { begin: 0.5, end: 0.8 },
            Fragment { begin: 2.0, end: 10.0 },
        ];
        let clipped = clip_fragments(fragments, 5.0);
        assert_eq!(clipped[1].begin, 1.0);
        assert_eq!(clipped[2].end, 5.0);
        for pair in clipped.windows(2) {
            assert!(pair[1].begin >= pair[0].end);
        }
    }
}
