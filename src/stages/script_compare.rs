//! Comparator stage (spec §4.11): WER/CER against the book text, seam
//! duplication/omission detection, anchor drift, and opening-retention
//! recomputation on the final collated sentences.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::algo::{cer, wer};
use crate::error::PipelineError;
use crate::json_canon::canonical_pretty;
use crate::manifest::Manifest;
use crate::model::anchor::AnchorArtifact;
use crate::model::report::{ComparisonReport, Metrics, SentenceMetrics, WindowMetrics};
use crate::model::sentence::RefinedSentence;
use crate::model::transcript::MergedTranscript;
use crate::model::windows::WindowsArtifact;
use crate::model::BookIndex;
use crate::runner::{check_fingerprint, record_completed, StageOutcome};
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::text::tokenize::{content_tokens, tokenize, TokenizerConfig};
use crate::workdir::{atomic_write, WorkDir};

const STAGE: &str = "script-compare";
const SHORT_PHRASE_MAX_WORDS: usize = 3;

#[derive(Serialize, Clone)]
pub struct ComparisonParams {
    pub lexicon_version: String,
    pub fold_spelling: bool,
}

impl Default for ComparisonParams {
    fn default() -> Self {
        Self { lexicon_version: "ams-lexicon/v1".to_string(), fold_spelling: true }
    }
}

#[derive(Serialize)]
struct Inputs<'a> {
    book_hash: &'a str,
    sentence_count: usize,
    window_count: usize,
}

fn book_text(book: &BookIndex, start: usize, end: usize) -> String {
    book.words[start..end.min(book.words.len())]
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// ASR text spoken within `[from, to)` of chapter time, the closest
/// available proxy for "what the collated audio says" since collation only
/// ever removes silence, never speech (spec §4.10 Non-goals).
fn asr_text_in_window(asr: &MergedTranscript, from: f64, to: f64) -> String {
    asr.words
        .iter()
        .filter(|w| w.start >= from && w.end <= to)
        .map(|w| w.word.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn canonical_word(text: &str, fold_spelling: bool) -> Option<String> {
    let cfg = TokenizerConfig { fold_spelling };
    tokenize(&[text], &cfg).into_iter().next().map(|t| t.text)
}

/// Duplication: the book word immediately before a gap and the book word
/// immediately after it are the same token, meaning the renderer kept a
/// spoken word on both sides of a seam it should have cut cleanly.
/// Omission: the two sentences' book-word ranges are not adjacent, meaning
/// a book word between them was never captured by either sentence.
fn seam_defects(
    sentences: &[RefinedSentence],
    book: &BookIndex,
    fold_spelling: bool,
) -> (u32, u32, Vec<SeamCheck>) {
    let mut duplications = 0u32;
    let mut omissions = 0u32;
    let mut checks = Vec::new();

    for pair in sentences.windows(2) {
        let (left, right) = (&pair[0], &pair[1]);
        let (Some(left_end), Some(right_start)) = (left.end_word_idx, right.start_word_idx) else {
            continue;
        };

        let mut duplicated = false;
        let mut omitted = false;

        if let (Some(left_word), Some(right_word)) = (book.words.get(left_end), book.words.get(right_start)) {
            if let (Some(a), Some(b)) = (
                canonical_word(&left_word.text, fold_spelling),
                canonical_word(&right_word.text, fold_spelling),
            ) {
                if a == b && left_end != right_start {
                    duplicated = true;
                    duplications += 1;
                }
            }
        }
        if right_start > left_end + 1 {
            omitted = true;
            omissions += 1;
        }

        checks.push(SeamCheck {
            left_sentence: left.id.clone(),
            right_sentence: right.id.clone(),
            left_end_word_idx: left_end,
            right_start_word_idx: right_start,
            duplicated,
            omitted,
        });
    }

    (duplications, omissions, checks)
}

#[derive(Serialize)]
struct SeamCheck {
    left_sentence: String,
    right_sentence: String,
    left_end_word_idx: usize,
    right_start_word_idx: usize,
    duplicated: bool,
    omitted: bool,
}

/// A short book sentence is "lost" if no refined sentence's word range
/// covers it at all (spec §4.11 `shortPhraseLossRate`).
fn short_phrase_loss_rate(book: &BookIndex, sentences: &[RefinedSentence]) -> f64 {
    let short: Vec<_> = book
        .sentences
        .iter()
        .filter(|s| s.range.end.saturating_sub(s.range.start) + 1 <= SHORT_PHRASE_MAX_WORDS)
        .collect();
    if short.is_empty() {
        return 0.0;
    }
    let lost = short
        .iter()
        .filter(|s| {
            !sentences.iter().any(|sent| match (sent.start_word_idx, sent.end_word_idx) {
                (Some(a), Some(b)) => a <= s.range.end && b >= s.range.start,
                _ => false,
            })
        })
        .count();
    lost as f64 / short.len() as f64
}

fn anchor_coverage(windows: &WindowsArtifact) -> f64 {
    if windows.windows.is_empty() {
        return 1.0;
    }
    let anchored = windows.windows.iter().filter(|w| w.prev_anchor.is_some() && w.next_anchor.is_some()).count();
    anchored as f64 / windows.windows.len() as f64
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((p * sorted.len() as f64).ceil() as usize).saturating_sub(1).min(sorted.len() - 1);
    sorted[rank]
}

/// Anchor drift: the absolute time delta between an anchor's forced-aligned
/// ASR position and its book-time expectation (spec §4.11), recomputed by
/// rebuilding the same content-token filtering the anchor stage used so
/// `ap` positions resolve back to real ASR word times.
fn anchor_drift(
    anchors: &AnchorArtifact,
    book: &BookIndex,
    asr: &MergedTranscript,
    fold_spelling: bool,
) -> (f64, f64) {
    let cfg = TokenizerConfig { fold_spelling };
    let asr_words: Vec<&str> = asr.words.iter().map(|w| w.word.as_str()).collect();
    let asr_tokens = tokenize(&asr_words, &cfg);
    let asr_content = content_tokens(&asr_tokens);

    let mut deltas: Vec<f64> = anchors
        .selected
        .iter()
        .filter_map(|a| {
            let asr_token = asr_content.get(a.ap)?;
            let actual = asr.words.get(asr_token.source_index)?.start;
            let expected = book.word_time_estimate(a.bp_word_index);
            Some((actual - expected).abs())
        })
        .collect();
    deltas.sort_by(|a, b| a.partial_cmp(b).unwrap());

    (percentile(&deltas, 0.50), percentile(&deltas, 0.95))
}

fn opening_retention(sentences: &[RefinedSentence], asr: &MergedTranscript) -> f64 {
    let expected: Vec<&crate::model::transcript::MergedWord> = asr.words.iter().filter(|w| w.start < 10.0).collect();
    if expected.is_empty() {
        return 1.0;
    }
    let covered = expected.iter().filter(|w| sentences.iter().any(|s| s.start <= w.start && w.end <= s.end)).count();
    covered as f64 / expected.len() as f64
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    book: &BookIndex,
    asr: &MergedTranscript,
    sentences: &[RefinedSentence],
    windows: &WindowsArtifact,
    anchors: &AnchorArtifact,
    params: ComparisonParams,
) -> Result<StageOutcome, PipelineError> {
    let tool_versions = BTreeMap::new();
    let inputs = Inputs { book_hash: &anchors.meta.book_hash, sentence_count: sentences.len(), window_count: windows.windows.len() };
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, &inputs, &params, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let sentence_metrics: Vec<SentenceMetrics> = sentences
        .iter()
        .filter_map(|s| {
            let (start_idx, end_idx) = (s.start_word_idx?, s.end_word_idx?);
            let reference = book_text(book, start_idx, end_idx + 1);
            let hypothesis = asr_text_in_window(asr, s.start, s.end);
            Some(SentenceMetrics { sentence_id: s.id.clone(), wer: wer(&reference, &hypothesis), cer: cer(&reference, &hypothesis) })
        })
        .collect();

    let window_metrics: Vec<WindowMetrics> = windows
        .windows
        .iter()
        .map(|w| {
            let reference = book_text(book, w.book_start, w.book_end);
            let from = book.word_time_estimate(w.book_start);
            let to = book.word_time_estimate(w.book_end.min(book.totals.words.saturating_sub(1)));
            let hypothesis = asr_text_in_window(asr, from, to);
            let window_wer = wer(&reference, &hypothesis);
            let window_cer = cer(&reference, &hypothesis);
            WindowMetrics {
                window_id: w.id.clone(),
                metrics: Metrics {
                    wer: window_wer,
                    cer: window_cer,
                    opening_retention0_10s: 0.0,
                    short_phrase_loss_rate: 0.0,
                    seam_duplications: 0,
                    seam_omissions: 0,
                    anchor_coverage: 0.0,
                    anchor_drift_p50: 0.0,
                    anchor_drift_p95: 0.0,
                },
            }
        })
        .collect();

    let chapter_reference = book_text(book, 0, book.totals.words);
    let chapter_hypothesis = asr.text.clone();
    let (duplications, omissions, seam_checks) = seam_defects(sentences, book, params.fold_spelling);
    let short_loss = short_phrase_loss_rate(book, sentences);
    let coverage = anchor_coverage(windows);
    let (drift_p50, drift_p95) = anchor_drift(anchors, book, asr, params.fold_spelling);
    let retention = opening_retention(sentences, asr);

    let chapter = Metrics {
        wer: wer(&chapter_reference, &chapter_hypothesis),
        cer: cer(&chapter_reference, &chapter_hypothesis),
        opening_retention0_10s: retention,
        short_phrase_loss_rate: short_loss,
        seam_duplications: duplications,
        seam_omissions: omissions,
        anchor_coverage: coverage,
        anchor_drift_p50: drift_p50,
        anchor_drift_p95: drift_p95,
    };

    let report = ComparisonReport { chapter, windows: window_metrics, sentences: sentence_metrics };

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &params)?;
    write_meta(&stage_dir, &tool_versions)?;

    atomic_write(&stage_dir.join("report.json"), canonical_pretty(&report)?.as_bytes())?;

    let mut map_lines = String::new();
    for check in &seam_checks {
        map_lines.push_str(&crate::json_canon::canonical_string(check)?);
        map_lines.push('\n');
    }
    atomic_write(&stage_dir.join("map.jsonl"), map_lines.as_bytes())?;

    write_status(&stage_dir, completed_status())?;

    let artifacts = BTreeMap::from([
        ("report".to_string(), "report.json".to_string()),
        ("map".to_string(), "map.jsonl".to_string()),
    ]);
    record_completed(manifest, STAGE, fp, artifacts.clone());
    Ok(StageOutcome::Completed { artifacts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::book::{BookParagraph, BookSentence, BookTotals, BookWord, ParagraphKind, WordRange};
    use crate::model::sentence::SentenceSource;
    use crate::model::transcript::MergedWord;
    use crate::model::windows::{BuiltWindow, WindowsMeta, WindowsParams};
    use crate::model::AnchorParams;

    fn sample_book() -> BookIndex {
        let words = ["the", "quick", "brown", "fox", "jumps"];
        let book_words: Vec<BookWord> = words
            .iter()
            .enumerate()
            .map(|(i, w)| BookWord {
                text: w.to_string(),
                word_index: i,
                sentence_index: 0,
                paragraph_index: 0,
                section_index: None,
                phonemes: None,
            })
            .collect();
        BookIndex {
            source_file: "book.docx".to_string(),
            source_file_hash: "x".to_string(),
            indexed_at: chrono::Utc::now(),
            title: None,
            author: None,
            totals: BookTotals { words: words.len(), sentences: 1, paragraphs: 1, estimated_duration_sec: 5.0 },
            words: book_words,
            sentences: vec![BookSentence { range: WordRange { start: 0, end: words.len() - 1 } }],
            paragraphs: vec![BookParagraph { range: WordRange { start: 0, end: words.len() - 1 }, kind: ParagraphKind::Body, style: "Normal".to_string() }],
            sections: vec![],
        }
    }

    fn sample_asr() -> MergedTranscript {
        let words: Vec<MergedWord> = ["the", "quick", "brown", "fox", "jumps"]
            .iter()
            .enumerate()
            .map(|(i, w)| MergedWord {
                word: w.to_string(),
                start: i as f64,
                end: i as f64 + 0.9,
                confidence: Some(0.9),
                chunk_id: "chunk_001".to_string(),
            })
            .collect();
        MergedTranscript { text: "the quick brown fox jumps".to_string(), words }
    }

    fn sample_sentence(id: &str, start: f64, end: f64, start_idx: usize, end_idx: usize) -> RefinedSentence {
        RefinedSentence { id: id.to_string(), start, end, start_word_idx: Some(start_idx), end_word_idx: Some(end_idx), source: SentenceSource::AeneasNoSnap }
    }

    fn empty_windows() -> WindowsArtifact {
        WindowsArtifact { meta: WindowsMeta::default(), params: WindowsParams::default(), windows: vec![] }
    }

    #[test]
    fn identical_transcripts_score_zero_wer() {
        let sentences = vec![sample_sentence("sent_0001", 0.0, 5.0, 0, 4)];
        let (dup, om, _) = seam_defects(&sentences, &sample_book(), true);
        assert_eq!(dup, 0);
        assert_eq!(om, 0);
    }

    #[test]
    fn adjacent_sentences_with_no_gap_have_no_defects() {
        let sentences = vec![sample_sentence("sent_0001", 0.0, 2.0, 0, 1), sample_sentence("sent_0002", 2.0, 5.0, 2, 4)];
        let (dup, om, checks) = seam_defects(&sentences, &sample_book(), true);
        assert_eq!(dup, 0);
        assert_eq!(om, 0);
        assert_eq!(checks.len(), 1);
    }

    #[test]
    fn detects_an_omitted_book_word_between_sentences() {
        // sentence 0 ends at word 0 ("the"), sentence 1 starts at word 2
        // ("brown"): word 1 ("quick") was never captured by either.
        let sentences = vec![sample_sentence("sent_0001", 0.0, 1.0, 0, 0), sample_sentence("sent_0002", 1.0, 5.0, 2, 4)];
        let (_, om, _) = seam_defects(&sentences, &sample_book(), true);
        assert_eq!(om, 1);
    }

    #[test]
    fn anchor_coverage_is_one_when_every_window_is_anchored() {
        let windows = WindowsArtifact {
            meta: WindowsMeta::default(),
            params: WindowsParams::default(),
            windows: vec![BuiltWindow { id: "w1".to_string(), book_start: 0, book_end: 5, asr_start: None, asr_end: None, prev_anchor: Some(0), next_anchor: Some(1) }],
        };
        assert_eq!(anchor_coverage(&windows), 1.0);
    }

    #[test]
    fn anchor_drift_is_zero_for_a_perfectly_aligned_anchor() {
        let book = sample_book();
        let asr = sample_asr();
        let anchors = AnchorArtifact {
            meta: crate::model::anchor::AnchorMeta {
                book_hash: "x".to_string(),
                asr_hash: "y".to_string(),
                tokenizer_version: "v".to_string(),
                stopwords_hash: "z".to_string(),
            },
            params: AnchorParams::default(),
            candidates: vec![],
            selected: vec![crate::model::anchor::AnchorSelected { bp: 0, ap: 0, bp_word_index: 0, score: 0.0, ngram_size: 0 }],
            stats: Default::default(),
        };
        let (p50, p95) = anchor_drift(&anchors, &book, &asr, true);
        assert!(p50 < 1.0 && p95 < 1.0);
    }

    #[test]
    fn short_phrase_loss_rate_is_zero_when_book_has_no_short_sentences() {
        let book = sample_book(); // 5-word single sentence, above the short-phrase threshold
        let sentences = vec![sample_sentence("sent_0001", 0.0, 5.0, 0, 4)];
        assert_eq!(short_phrase_loss_rate(&book, &sentences), 0.0);
    }

    #[test]
    fn empty_windows_report_has_no_window_metrics() {
        let book = sample_book();
        let asr = sample_asr();
        let windows = empty_windows();
        assert!(windows.windows.is_empty());
        let retention = opening_retention(&[sample_sentence("sent_0001", 0.0, 5.0, 0, 4)], &asr);
        assert_eq!(retention, 1.0);
        let _ = book;
    }
}
