//! N-gram anchor mining and relaxation (spec §4.6 steps 3–5).
//!
//! Operates on the already-filtered (stopword-stripped) content-token
//! streams, so every n-gram built here is trivially "content-bearing" —
//! the filtering already happened in [`crate::text::tokenize::content_tokens`].
//! `bp`/`ap` in the resulting candidates are positions within those
//! filtered streams, matching [`crate::model::anchor::AnchorCandidate`].

use std::collections::HashMap;

use crate::model::anchor::{AnchorCandidate, AnchorParams};
use crate::text::tokenize::CanonicalToken;

fn ngram_key(tokens: &[CanonicalToken], start: usize, n: usize) -> String {
    tokens[start..start + n]
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Maps each n-gram of size `n` to the list of start positions where it
/// occurs, in ascending order.
fn build_index(tokens: &[CanonicalToken], n: usize) -> HashMap<String, Vec<usize>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    if tokens.len() < n {
        return index;
    }
    for start in 0..=(tokens.len() - n) {
        let key = ngram_key(tokens, start, n);
        index.entry(key).or_default().push(start);
    }
    index
}

fn well_separated(positions: &[usize], min_separation: usize) -> bool {
    positions
        .windows(2)
        .all(|w| w[1].saturating_sub(w[0]) >= min_separation)
}

struct Round {
    n: usize,
    candidates: Vec<AnchorCandidate>,
}

fn mine_round(
    book: &[CanonicalToken],
    asr: &[CanonicalToken],
    n: usize,
    min_separation: usize,
    allow_two_occurrence: bool,
) -> Round {
    let book_index = build_index(book, n);
    let asr_index = build_index(asr, n);
    let mut candidates = Vec::new();

    for (key, book_positions) in &book_index {
        let Some(asr_positions) = asr_index.get(key) else { continue };

        let book_ok = book_positions.len() == 1
            || (allow_two_occurrence
                && book_positions.len() <= 2
                && well_separated(book_positions, min_separation));
        let asr_ok = asr_positions.len() == 1
            || (allow_two_occurrence
                && asr_positions.len() <= 2
                && well_separated(asr_positions, min_separation));
        if !book_ok || !asr_ok {
            continue;
        }

        let rarity = 1.0 / (book_positions.len() + asr_positions.len()) as f64;
        for &bp in book_positions {
            for &ap in asr_positions {
                let bp_frac = bp as f64 / book.len().max(1) as f64;
                let ap_frac = ap as f64 / asr.len().max(1) as f64;
                let proximity_penalty = (bp_frac - ap_frac).abs() * 5.0;
                let score = n as f64 * 10.0 + rarity - proximity_penalty;
                candidates.push(AnchorCandidate {
                    bp,
                    ap,
                    bp_word_index: book[bp].source_index,
                    score,
                    ngram_size: n,
                });
            }
        }
    }

    Round { n, candidates }
}

/// Mine anchor candidates, stepping `n` down from `params.ngram` to
/// `params.relax_down_to` and widening to two-occurrence matches when
/// density stays below `params.target_per_tokens`. Returns the candidates
/// (deduplicated by `(bp, ap)`, highest score kept) and the smallest `n`
/// that was actually needed.
pub fn mine_anchors(
    book: &[CanonicalToken],
    asr: &[CanonicalToken],
    params: &AnchorParams,
) -> (Vec<AnchorCandidate>, usize) {
    let mut by_pair: HashMap<(usize, usize), AnchorCandidate> = HashMap::new();
    let mut relaxed_to = params.ngram;
    let token_count = book.len().max(asr.len()).max(1) as f64;

    let lo = params.relax_down_to.max(1);
    let hi = params.ngram.max(lo);

    for n in (lo..=hi).rev() {
        let unique_round = mine_round(book, asr, n, params.min_separation, false);
        merge_round(&mut by_pair, unique_round.candidates);
        relaxed_to = n;

        if density(&by_pair, token_count) >= params.target_per_tokens {
            break;
        }

        let relaxed_round = mine_round(book, asr, n, params.min_separation, true);
        merge_round(&mut by_pair, relaxed_round.candidates);

        if density(&by_pair, token_count) >= params.target_per_tokens || n == lo {
            break;
        }
    }

    let mut candidates: Vec<AnchorCandidate> = by_pair.into_values().collect();
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap()
            .then(a.bp.cmp(&b.bp))
            .then(a.ap.cmp(&b.ap))
    });

    (candidates, relaxed_to)
}

fn merge_round(by_pair: &mut HashMap<(usize, usize), AnchorCandidate>, round: Vec<AnchorCandidate>) {
    for c in round {
        by_pair
            .entry((c.bp, c.ap))
            .and_modify(|existing| {
                if c.score > existing.score {
                    *existing = c.clone();
                }
            })
            .or_insert(c);
    }
}

fn density(by_pair: &HashMap<(usize, usize), AnchorCandidate>, token_count: f64) -> f64 {
    by_pair.len() as f64 / token_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::tokenize::{tokenize, TokenizerConfig};

    fn content(words: &[&str]) -> Vec<CanonicalToken> {
        let toks = tokenize(words, &TokenizerConfig::default());
        toks.into_iter().filter(|t| !t.is_stopword).collect()
    }

    #[test]
    fn finds_unique_trigram_match() {
        let book = content(&["once", "upon", "midnight", "dreary", "weak", "weary"]);
        let asr = content(&["garbled", "once", "upon", "midnight", "dreary", "noise"]);
        let params = AnchorParams::default();
        let (candidates, _) = mine_anchors(&book, &asr, &params);
        assert!(candidates.iter().any(|c| c.bp == 0 && c.ap == 0));
    }

    #[test]
    fn relaxes_ngram_size_when_sparse() {
        let book = content(&["zephyr", "quartz"]);
        let asr = content(&["zephyr", "quartz"]);
        let mut params = AnchorParams::default();
        params.ngram = 3;
        params.relax_down_to = 2;
        let (candidates, relaxed_to) = mine_anchors(&book, &asr, &params);
        assert!(relaxed_to <= 2);
        assert!(!candidates.is_empty());
    }

    #[test]
    fn rejects_close_duplicate_occurrences_under_min_separation() {
        let book = content(&["alpha", "bravo", "charlie", "alpha", "bravo", "charlie"]);
        let asr = content(&["alpha", "bravo", "charlie"]);
        let mut params = AnchorParams::default();
        params.min_separation = 50;
        let (candidates, _) = mine_anchors(&book, &asr, &params);
        // Book has two occurrences closer than min_separation apart; the
        // relaxed two-occurrence path must not accept them.
        assert!(candidates.is_empty() || candidates.iter().all(|c| c.ngram_size < 3));
    }
}
