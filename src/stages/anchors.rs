//! Anchor selector stage (spec §4.6): tokenize both streams, mine n-gram
//! candidates, extract the LIS-monotone selection, and always seed a
//! synthetic `(0, 0)` start anchor.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::algo::{longest_increasing_subsequence, mine_anchors};
use crate::error::PipelineError;
use crate::json_canon::canonical_pretty;
use crate::manifest::Manifest;
use crate::model::anchor::{AnchorArtifact, AnchorMeta, AnchorSelected, AnchorStats};
use crate::model::{AnchorParams, BookIndex, MergedTranscript};
use crate::runner::{check_fingerprint, record_completed, StageOutcome};
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::text::lexicon::STOPWORDS;
use crate::text::section::localize;
use crate::text::tokenize::{content_tokens, tokenize, TokenizerConfig};
use crate::workdir::{atomic_write, WorkDir};

const STAGE: &str = "anchors";
pub const TOKENIZER_VERSION: &str = "ams-tokenizer/v1";

#[derive(Serialize)]
struct Inputs<'a> {
    book_hash: &'a str,
    asr_hash: &'a str,
}

fn hash_words<'a>(words: impl Iterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for w in words {
        hasher.update(w.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn stopwords_hash() -> String {
    let mut sorted: Vec<&str> = STOPWORDS.iter().copied().collect();
    sorted.sort();
    hash_words(sorted.into_iter())
}

pub fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    book: &BookIndex,
    asr: &MergedTranscript,
    params: AnchorParams,
) -> Result<StageOutcome, PipelineError> {
    let book_words: Vec<&str> = book.words.iter().map(|w| w.text.as_str()).collect();
    let asr_words: Vec<&str> = asr.words.iter().map(|w| w.word.as_str()).collect();

    let book_hash = hash_words(book_words.iter().copied());
    let asr_hash = hash_words(asr_words.iter().copied());
    let tool_versions = BTreeMap::new();

    let inputs = Inputs { book_hash: &book_hash, asr_hash: &asr_hash };
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, &inputs, &params, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let cfg = TokenizerConfig { fold_spelling: true };
    let book_tokens = tokenize(&book_words, &cfg);
    let asr_tokens = tokenize(&asr_words, &cfg);
    let book_content = content_tokens(&book_tokens);
    let asr_content = content_tokens(&asr_tokens);

    let mut book_content_owned: Vec<_> = book_content.into_iter().cloned().collect();
    let asr_content_owned: Vec<_> = asr_content.into_iter().cloned().collect();

    // §4.6 step 2: restrict the book search window to a matched section
    // when the ASR prefix carries a recognizable heading cue.
    let section_match = localize(&asr_words, book);
    if let Some(ref m) = section_match {
        book_content_owned.retain(|t| t.source_index >= m.start_word && t.source_index <= m.end_word);
    }

    let (candidates, relaxed_to) = mine_anchors(&book_content_owned, &asr_content_owned, &params);

    // mine_anchors sorts by (score desc, bp asc, ap asc); LIS needs ascending
    // bp to find a monotone ap subsequence, so re-sort a working copy by bp
    // before extracting the subsequence.
    let mut by_bp = candidates.clone();
    by_bp.sort_by(|a, b| a.bp.cmp(&b.bp).then(a.ap.cmp(&b.ap)));
    let ap_keys: Vec<f64> = by_bp.iter().map(|c| c.ap as f64).collect();
    let lis_indices = longest_increasing_subsequence(&ap_keys);

    // Synthetic start anchor at (0, 0), or at the section's startWord when
    // localized (spec §4.6 step 6).
    let sentinel_bp_word_index = section_match.as_ref().map(|m| m.start_word).unwrap_or(0);
    let mut selected: Vec<AnchorSelected> = Vec::with_capacity(lis_indices.len() + 1);
    selected.push(AnchorSelected { bp: 0, ap: 0, bp_word_index: sentinel_bp_word_index, score: 0.0, ngram_size: 0 });
    for idx in lis_indices {
        selected.push(AnchorSelected::from(&by_bp[idx]));
    }
    selected.dedup_by(|a, b| a.bp == b.bp && a.ap == b.ap);

    let artifact = AnchorArtifact {
        meta: AnchorMeta {
            book_hash,
            asr_hash,
            tokenizer_version: TOKENIZER_VERSION.to_string(),
            stopwords_hash: stopwords_hash(),
        },
        params: params.clone(),
        candidates: candidates.clone(),
        selected: selected.clone(),
        stats: AnchorStats {
            candidate_count: candidates.len(),
            selected_count: selected.len(),
            relaxed_to_ngram: relaxed_to,
            section_localized: section_match.is_some(),
            localized_section_id: section_match.map(|m| m.section_id),
        },
    };

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &params)?;
    write_meta(&stage_dir, &tool_versions)?;

    let path = stage_dir.join("anchors.json");
    atomic_write(&path, canonical_pretty(&artifact)?.as_bytes())?;

    write_status(&stage_dir, completed_status())?;

    let artifacts = BTreeMap::from([("anchors".to_string(), "anchors.json".to_string())]);
    record_completed(manifest, STAGE, fp, artifacts.clone());
    Ok(StageOutcome::Completed { artifacts })
}

/// Chapter-time position of each selected anchor's ASR-aligned word:
/// resolves `ap` back through the same content-token filtering this stage
/// used, to a real `MergedWord.start`. These are the immutable boundary
/// points the refiner (spec §4.9) clips sentence edges to.
pub fn anchor_asr_times(anchors: &AnchorArtifact, asr: &MergedTranscript) -> Vec<f64> {
    let cfg = TokenizerConfig { fold_spelling: true };
    let asr_words: Vec<&str> = asr.words.iter().map(|w| w.word.as_str()).collect();
    let asr_tokens = tokenize(&asr_words, &cfg);
    let asr_content = content_tokens(&asr_tokens);

    anchors
        .selected
        .iter()
        .filter_map(|a| {
            let token = asr_content.get(a.ap)?;
            asr.words.get(token.source_index).map(|w| w.start)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::InputInfo;
    use crate::model::book::{BookTotals, BookWord};
    use crate::model::MergedWord;
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

    fn book_with(words: &[&str]) -> BookIndex {
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
            totals: BookTotals {
                words: book_words.len(),
                sentences: 1,
                paragraphs: 1,
                estimated_duration_sec: 100.0,
            },
            words: book_words,
            sentences: vec![crate::model::book::BookSentence { range: crate::model::book::WordRange { start: 0, end: words.len() - 1 } }],
            paragraphs: vec![crate::model::book::BookParagraph {
                range: crate::model::book::WordRange { start: 0, end: words.len() - 1 },
                kind: crate::model::book::ParagraphKind::Body,
                style: "Normal".to_string(),
            }],
            sections: vec![],
        }
    }

    #[test]
    fn always_seeds_a_synthetic_start_anchor() {
        let dir = tempdir().unwrap();
        let work_dir = WorkDir::explicit(dir.path().to_path_buf());
        let mut manifest = Manifest::new(sample_input());

        let book = book_with(&["once", "upon", "midnight", "dreary", "weak", "weary"]);
        let asr_words: Vec<MergedWord> = ["once", "upon", "midnight", "dreary", "weak", "weary"]
            .iter()
            .enumerate()
            .map(|(i, w)| MergedWord {
                word: w.to_string(),
                start: i as f64,
                end: i as f64 + 0.5,
                confidence: Some(0.9),
                chunk_id: "chunk_001".to_string(),
            })
            .collect();
        let asr = MergedTranscript { words: asr_words, text: "once upon midnight dreary weak weary".to_string() };

        let outcome = run(&work_dir, &mut manifest, &book, &asr, AnchorParams::default()).unwrap();
        assert!(matches!(outcome, StageOutcome::Completed { .. }));

        let text = std::fs::read_to_string(dir.path().join("anchors/anchors.json")).unwrap();
        let artifact: AnchorArtifact = serde_json::from_str(&text).unwrap();
        assert_eq!(artifact.selected[0].bp, 0);
        assert_eq!(artifact.selected[0].ap, 0);
    }

    #[test]
    fn restricts_mining_to_a_localized_chapter_section() {
        let dir = tempdir().unwrap();
        let work_dir = WorkDir::explicit(dir.path().to_path_buf());
        let mut manifest = Manifest::new(sample_input());

        // Two chapters sharing the word "storm" so an unrestricted search
        // would be ambiguous; the ASR heading cue picks out chapter 14.
        let book_raw = [
            "chapter", "thirteen", "calm", "seas", "storm", "free",
            "chapter", "fourteen", "storm", "clouds", "gathered", "fast",
        ];
        let mut book = book_with(&book_raw);
        book.sections = vec![
            crate::model::book::BookSection {
                id: "ch13".to_string(),
                title: "Chapter 13".to_string(),
                level: 1,
                kind: crate::model::book::SectionKind::Chapter,
                start_word: 0,
                end_word: 5,
                start_paragraph: 0,
                end_paragraph: 0,
            },
            crate::model::book::BookSection {
                id: "ch14".to_string(),
                title: "Chapter 14: Storm".to_string(),
                level: 1,
                kind: crate::model::book::SectionKind::Chapter,
                start_word: 6,
                end_word: 11,
                start_paragraph: 0,
                end_paragraph: 0,
            },
        ];

        let asr_words_raw = ["chapter", "fourteen", "storm", "clouds", "gathered", "fast"];
        let asr_words: Vec<MergedWord> = asr_words_raw
            .iter()
            .enumerate()
            .map(|(i, w)| MergedWord {
                word: w.to_string(),
                start: i as f64,
                end: i as f64 + 0.5,
                confidence: Some(0.9),
                chunk_id: "chunk_001".to_string(),
            })
            .collect();
        let asr = MergedTranscript { words: asr_words, text: asr_words_raw.join(" ") };

        let outcome = run(&work_dir, &mut manifest, &book, &asr, AnchorParams::default()).unwrap();
        assert!(matches!(outcome, StageOutcome::Completed { .. }));

        let text = std::fs::read_to_string(dir.path().join("anchors/anchors.json")).unwrap();
        let artifact: AnchorArtifact = serde_json::from_str(&text).unwrap();
        assert!(artifact.stats.section_localized);
        assert_eq!(artifact.stats.localized_section_id.as_deref(), Some("ch14"));
        // Every selected anchor (aside from the sentinel) must point back
        // into chapter 14's word range, never chapter 13's.
        for sel in artifact.selected.iter().skip(1) {
            assert!(sel.bp_word_index >= 6 && sel.bp_word_index <= 11);
        }
    }
}
