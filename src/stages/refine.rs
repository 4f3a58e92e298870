//! Sentence refiner stage (spec §4.9): snap-to-silence sentence ends under
//! monotonicity, non-overlap, and anchor-immutability constraints.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::PipelineError;
use crate::json_canon::canonical_pretty;
use crate::manifest::Manifest;
use crate::model::sentence::{RefineStats, RefinedSentence, RefinedSentences, SentenceSource, SentinelWindow};
use crate::model::{Fragment, RefineParams, SilenceEvent};
use crate::runner::{check_fingerprint, record_completed, StageOutcome};
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::workdir::{atomic_write, WorkDir};

const STAGE: &str = "refine";

#[derive(Serialize)]
struct Inputs {
    fragment_count: usize,
}

/// One input sentence before refinement: its raw aligned span in chapter
/// time, plus the book word-index range it covers (when known).
pub struct RawSentence {
    pub fragment: Fragment,
    pub start_word_idx: Option<usize>,
    pub end_word_idx: Option<usize>,
}

/// Applies spec §4.9 steps 1–4 to the chronologically ordered `raw`
/// sentences. `anchor_times` are chapter-time points sentence boundaries
/// must never cross.
fn refine_sentences(
    raw: &[RawSentence],
    events: &[SilenceEvent],
    params: &RefineParams,
    anchor_times: &[f64],
) -> (Vec<RefinedSentence>, RefineStats) {
    let mut stats = RefineStats::default();
    let mut sentences = Vec::with_capacity(raw.len());

    for (i, r) in raw.iter().enumerate() {
        let start = r.fragment.begin;
        let next_start = raw.get(i + 1).map(|n| n.fragment.begin).unwrap_or(f64::INFINITY);

        let candidates: Vec<&SilenceEvent> = events
            .iter()
            .filter(|e| {
                e.duration >= params.min_silence_dur_sec
                    && e.start >= r.fragment.end
                    && e.start < next_start
            })
            .collect();

        let (mut end, source) = match candidates.iter().min_by(|a, b| a.start.partial_cmp(&b.start).unwrap()) {
            Some(e) => {
                stats.snapped_count += 1;
                (e.start, SentenceSource::AeneasSilenceStart)
            }
            None => {
                stats.no_snap_count += 1;
                (r.fragment.end, SentenceSource::AeneasNoSnap)
            }
        };

        if end < start + 0.05 {
            end = start + 0.05;
        }
        if end >= next_start {
            end = next_start - 0.001;
            stats.overlap_fixes += 1;
        }
        for &anchor_t in anchor_times {
            if end > anchor_t && start < anchor_t {
                end = anchor_t;
                stats.overlap_fixes += 1;
            }
        }

        sentences.push(RefinedSentence {
            id: format!("sent_{:04}", i + 1),
            start,
            end,
            start_word_idx: r.start_word_idx,
            end_word_idx: r.end_word_idx,
            source,
        });
    }

    (sentences, stats)
}

fn opening_retention(sentences: &[RefinedSentence], asr_word_times: &[(f64, f64)]) -> f64 {
    let expected: Vec<&(f64, f64)> = asr_word_times.iter().filter(|(s, _)| *s < 10.0).collect();
    if expected.is_empty() {
        return 1.0;
    }
    let covered = expected
        .iter()
        .filter(|(s, e)| sentences.iter().any(|sent| sent.start <= *s && *e <= sent.end))
        .count();
    covered as f64 / expected.len() as f64
}

pub fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    raw: &[RawSentence],
    events: &[SilenceEvent],
    anchor_times: &[f64],
    asr_word_times: &[(f64, f64)],
    params: RefineParams,
) -> Result<StageOutcome, PipelineError> {
    let tool_versions = BTreeMap::new();
    let inputs = Inputs { fragment_count: raw.len() };
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, &inputs, &params, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let (sentences, stats) = refine_sentences(raw, events, &params, anchor_times);
    let retention = opening_retention(&sentences, asr_word_times);

    let refined = RefinedSentences {
        params: params.clone(),
        sentences,
        opening_sentinel: SentinelWindow { window: [0.0, 10.0], retention },
        stats,
    };

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &params)?;
    write_meta(&stage_dir, &tool_versions)?;

    let path = stage_dir.join("sentences.json");
    atomic_write(&path, canonical_pretty(&refined)?.as_bytes())?;

    write_status(&stage_dir, completed_status())?;
    let artifacts = BTreeMap::from([("sentences".to_string(), "sentences.json".to_string())]);
    record_completed(manifest, STAGE, fp, artifacts.clone());
    Ok(StageOutcome::Completed { artifacts })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RefineParams {
        RefineParams::default()
    }

    #[test]
    fn snaps_sentence_end_to_following_silence_start() {
        let raw = vec![
            RawSentence { fragment: Fragment { begin: 0.0, end: 4.9 }, start_word_idx: Some(0), end_word_idx: Some(5) },
            RawSentence { fragment: Fragment { begin: 6.0, end: 10.0 }, start_word_idx: Some(6), end_word_idx: Some(10) },
        ];
        let events = vec![SilenceEvent::new(5.0, 5.9)];
        let (sentences, stats) = refine_sentences(&raw, &events, &params(), &[]);
        assert_eq!(sentences[0].end, 5.0);
        assert_eq!(sentences[0].source, SentenceSource::AeneasSilenceStart);
        assert_eq!(stats.snapped_count, 1);
    }

    #[test]
    fn falls_back_to_raw_end_when_no_silence_follows() {
        let raw = vec![RawSentence { fragment: Fragment { begin: 0.0, end: 4.9 }, start_word_idx: None, end_word_idx: None }];
        let (sentences, stats) = refine_sentences(&raw, &[], &params(), &[]);
        assert_eq!(sentences[0].end, 4.9);
        assert_eq!(sentences[0].source, SentenceSource::AeneasNoSnap);
        assert_eq!(stats.no_snap_count, 1);
    }

    #[test]
    fn prevents_overlap_with_next_sentence() {
        let raw = vec![
            RawSentence { fragment: Fragment { begin: 0.0, end: 4.9 }, start_word_idx: None, end_word_idx: None },
            RawSentence { fragment: Fragment { begin: 5.0, end: 8.0 }, start_word_idx: None, end_word_idx: None },
        ];
        // No qualifying silence event; raw.end would overlap next.start if left alone.
        let events = vec![];
        let (sentences, _) = refine_sentences(&raw, &events, &params(), &[]);
        assert!(sentences[0].end < sentences[1].start);
    }

    #[test]
    fn never_crosses_an_anchor_boundary() {
        let raw = vec![RawSentence { fragment: Fragment { begin: 0.0, end: 9.0 }, start_word_idx: None, end_word_idx: None }];
        let events = vec![SilenceEvent::new(8.0, 8.5)];
        // Anchor sits before the natural snap point; end must clip to it.
        let (sentences, _) = refine_sentences(&raw, &events, &params(), &[3.0]);
        assert_eq!(sentences[0].end, 3.0);
    }

    #[test]
    fn opening_retention_counts_covered_words_only() {
        let sentences = vec![RefinedSentence {
            id: "sent_0001".to_string(),
            start: 0.0,
            end: 9.5,
            start_word_idx: None,
            end_word_idx: None,
            source: SentenceSource::AeneasNoSnap,
        }];
        let words = vec![(0.0, 1.0), (9.0, 9.4), (9.6, 11.0)];
        let retention = opening_retention(&sentences, &words);
        assert!((retention - 2.0 / 3.0).abs() < 1e-9);
    }
}
