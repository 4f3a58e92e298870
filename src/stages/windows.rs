//! Window builder stage (spec §4.7): padded, anchor-bounded book-coordinate
//! windows between consecutive selected anchors.
//!
//! ASR-side coordinates (`asrStart`/`asrEnd`) are left unset: deriving them
//! requires a filtered-ASR-position → chapter-time mapping that the anchor
//! artifact does not currently carry (it only retains `bpWordIndex`, the
//! book-side original index). The windows artifact marks them optional for
//! exactly this reason (spec §3: "Windows artifact").

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::PipelineError;
use crate::json_canon::canonical_pretty;
use crate::manifest::Manifest;
use crate::model::anchor::AnchorArtifact;
use crate::model::windows::{BuiltWindow, WindowsArtifact, WindowsMeta, WindowsParams};
use crate::model::BookIndex;
use crate::runner::{check_fingerprint, record_completed, StageOutcome};
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::workdir::{atomic_write, WorkDir};

const STAGE: &str = "windows";

#[derive(Serialize)]
struct Inputs<'a> {
    anchor_count: usize,
    total_words: usize,
    book_hash: &'a str,
}

pub fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    book: &BookIndex,
    anchors: &AnchorArtifact,
    params: WindowsParams,
) -> Result<StageOutcome, PipelineError> {
    let total_words = book.totals.words;
    let tool_versions = BTreeMap::new();

    let inputs = Inputs {
        anchor_count: anchors.selected.len(),
        total_words,
        book_hash: &anchors.meta.book_hash,
    };
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, &inputs, &params, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let words_per_sec = if book.totals.estimated_duration_sec > 0.0 {
        total_words as f64 / book.totals.estimated_duration_sec
    } else {
        0.0
    };
    let pre_pad_words = (params.pre_pad_sec * words_per_sec).round() as i64;
    let pad_words = (params.pad_sec * words_per_sec).round() as i64;

    let mut anchors_sorted = anchors.selected.clone();
    anchors_sorted.sort_by_key(|a| a.bp_word_index);

    // A synthetic end sentinel at `total_words` so the final anchor-bounded
    // window reaches the end of the book (spec §3: "windows artifact ...
    // include synthetic start/end sentinels").
    anchors_sorted.push(crate::model::anchor::AnchorSelected {
        bp: usize::MAX,
        ap: usize::MAX,
        bp_word_index: total_words,
        score: 0.0,
        ngram_size: 0,
    });

    let mut windows = Vec::new();
    for pair in anchors_sorted.windows(2) {
        let left = &pair[0];
        let right = &pair[1];
        // A window never intrudes on a real anchor's own word (spec §4.7:
        // "windows never intrude into adjacent anchor spans"), so it starts
        // immediately after `left` -- unless `left` is a synthetic start/end
        // sentinel (`ngramSize == 0`, never produced by real anchor mining),
        // which marks a book boundary rather than a word to protect.
        let left_base = if left.ngram_size == 0 { left.bp_word_index } else { left.bp_word_index + 1 };
        let start = ((left_base as i64 - pre_pad_words).max(0) as usize).min(total_words);
        let end = ((right.bp_word_index as i64 + pad_words).max(0) as usize).min(total_words);
        if end <= start {
            continue;
        }
        windows.push(BuiltWindow {
            id: format!("win_{:03}", windows.len() + 1),
            book_start: start,
            book_end: end,
            asr_start: None,
            asr_end: None,
            prev_anchor: Some(left.bp_word_index),
            next_anchor: Some(right.bp_word_index),
        });
    }

    let mut covered = vec![false; total_words];
    for w in &windows {
        for i in w.book_start..w.book_end.min(total_words) {
            covered[i] = true;
        }
    }
    let covered_count = covered.iter().filter(|&&c| c).count();
    let coverage = if total_words > 0 { covered_count as f64 / total_words as f64 } else { 1.0 };

    let mut largest_gap_words = 0usize;
    let mut current_gap = 0usize;
    for c in &covered {
        if *c {
            current_gap = 0;
        } else {
            current_gap += 1;
            largest_gap_words = largest_gap_words.max(current_gap);
        }
    }
    let largest_gap_sec = if words_per_sec > 0.0 { largest_gap_words as f64 / words_per_sec } else { 0.0 };

    let artifact = WindowsArtifact {
        meta: WindowsMeta { coverage, largest_gap_sec, window_count: windows.len() },
        params: params.clone(),
        windows,
    };

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &params)?;
    write_meta(&stage_dir, &tool_versions)?;

    let path = stage_dir.join("windows.json");
    atomic_write(&path, canonical_pretty(&artifact)?.as_bytes())?;

    write_status(&stage_dir, completed_status())?;

    let artifacts = BTreeMap::from([("windows".to_string(), "windows.json".to_string())]);
    record_completed(manifest, STAGE, fp, artifacts.clone());
    Ok(StageOutcome::Completed { artifacts })
}
