//! Section localization (spec §4.6 step 2).
//!
//! Looks at the first ~12 tokens of the ASR stream for a chapter heading
//! ("chapter 14", "chapter fourteen", "chapter 28a", "prologue", ...) and
//! tries to match it against a [`BookSection`]. A match restricts the book
//! search window the anchor miner operates over, which both speeds up
//! mining and rules out cross-chapter false positives on common phrases.

use crate::model::book::{BookIndex, BookSection, SectionKind};

const PREFIX_LOOKAHEAD: usize = 12;
const FUZZY_SIMILARITY_THRESHOLD: f64 = 0.55;
const FUZZY_COVERAGE_THRESHOLD: f64 = 0.6;

/// A localized section match: the `[startWord, endWord]` range to restrict
/// anchor mining to, plus the matched section's id for diagnostics.
pub struct SectionMatch {
    pub section_id: String,
    pub start_word: usize,
    pub end_word: usize,
}

fn normalize_word(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn normalize_words(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| normalize_word(w)).filter(|w| !w.is_empty()).collect()
}

/// Split a token like "28a" into its leading digit run and trailing
/// alphabetic suffix. Returns `None` if the token has no leading digits.
fn split_digits_letter(tok: &str) -> Option<(u32, Option<String>)> {
    let digit_len = tok.chars().take_while(|c| c.is_ascii_digit()).count();
    if digit_len == 0 {
        return None;
    }
    let (digits, rest) = tok.split_at(digit_len);
    let n: u32 = digits.parse().ok()?;
    if rest.is_empty() {
        Some((n, None))
    } else if rest.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((n, Some(rest.to_string())))
    } else {
        None
    }
}

fn word_number_value(tok: &str) -> Option<u32> {
    Some(match tok {
        "zero" => 0,
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "thirteen" => 13,
        "fourteen" => 14,
        "fifteen" => 15,
        "sixteen" => 16,
        "seventeen" => 17,
        "eighteen" => 18,
        "nineteen" => 19,
        "twenty" => 20,
        "thirty" => 30,
        "forty" => 40,
        "fifty" => 50,
        "sixty" => 60,
        "seventy" => 70,
        "eighty" => 80,
        "ninety" => 90,
        _ => return None,
    })
}

/// Parse a chapter number (+ optional letter suffix) starting at `tokens[start]`.
/// Returns `(number, letter, tokens_consumed)`.
fn parse_chapter_number(tokens: &[String], start: usize) -> Option<(u32, Option<String>, usize)> {
    if start >= tokens.len() {
        return None;
    }
    // "28a" / "28" as a single numeral token, optionally followed by a
    // standalone letter token ("28 a").
    if let Some((n, letter)) = split_digits_letter(&tokens[start]) {
        if let Some(l) = letter {
            return Some((n, Some(l), 1));
        }
        if start + 1 < tokens.len() {
            let next = &tokens[start + 1];
            if next.len() == 1 && next.chars().all(|c| c.is_ascii_alphabetic()) {
                return Some((n, Some(next.clone()), 2));
            }
        }
        return Some((n, None, 1));
    }

    // Word-number phrase: "fourteen" or "twenty eight".
    let first = word_number_value(&tokens[start])?;
    let mut total = first;
    let mut consumed = 1;
    if first >= 20 && first % 10 == 0 && start + 1 < tokens.len() {
        if let Some(ones) = word_number_value(&tokens[start + 1]) {
            if ones < 10 {
                total += ones;
                consumed = 2;
            }
        }
    }
    let mut idx = start + consumed;
    if idx < tokens.len() {
        let next = &tokens[idx];
        if next.len() == 1 && next.chars().all(|c| c.is_ascii_alphabetic()) {
            idx += 1;
            return Some((total, Some(next.clone()), idx - start));
        }
    }
    Some((total, None, consumed))
}

/// Try to find `("chapter", number, letter?)` or a single-word heading
/// keyword within the first [`PREFIX_LOOKAHEAD`] normalized ASR tokens,
/// skipping leading metadata noise.
enum HeadingCue {
    Chapter { number: u32, letter: Option<String> },
    Keyword(SectionKind),
}

fn find_heading_cue(tokens: &[String]) -> Option<HeadingCue> {
    let limit = tokens.len().min(PREFIX_LOOKAHEAD);
    for i in 0..limit {
        match tokens[i].as_str() {
            "chapter" => {
                if let Some((n, letter, _)) = parse_chapter_number(tokens, i + 1) {
                    return Some(HeadingCue::Chapter { number: n, letter });
                }
            }
            "prologue" => return Some(HeadingCue::Keyword(SectionKind::Prologue)),
            "epilogue" => return Some(HeadingCue::Keyword(SectionKind::Epilogue)),
            "preface" => return Some(HeadingCue::Keyword(SectionKind::Preface)),
            "foreword" | "introduction" => return Some(HeadingCue::Keyword(SectionKind::FrontMatter)),
            "afterword" => return Some(HeadingCue::Keyword(SectionKind::BackMatter)),
            _ => continue,
        }
    }
    None
}

fn section_title_tokens(section: &BookSection) -> Vec<String> {
    let words: Vec<&str> = section.title.split_whitespace().collect();
    normalize_words(&words)
}

/// Parse a section's own title the same way, to compare chapter number +
/// letter against the ASR cue.
fn section_chapter_number(title_tokens: &[String]) -> Option<(u32, Option<String>)> {
    for i in 0..title_tokens.len() {
        if title_tokens[i] == "chapter" {
            if let Some((n, letter, _)) = parse_chapter_number(title_tokens, i + 1) {
                return Some((n, letter));
            }
        }
    }
    None
}

fn longest_common_prefix_len(a: &[String], b: &[String]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn fuzzy_best_match<'a>(prefix: &[String], sections: &'a [BookSection]) -> Option<&'a BookSection> {
    let mut best: Option<(&BookSection, f64)> = None;
    for section in sections {
        let title_tokens = section_title_tokens(section);
        if title_tokens.is_empty() {
            continue;
        }
        let lcp = longest_common_prefix_len(prefix, &title_tokens);
        if lcp == 0 {
            continue;
        }
        let similarity = lcp as f64 / prefix.len().max(title_tokens.len()) as f64;
        let coverage = lcp as f64 / title_tokens.len() as f64;
        if similarity >= FUZZY_SIMILARITY_THRESHOLD || coverage >= FUZZY_COVERAGE_THRESHOLD {
            let score = similarity.max(coverage);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((section, score));
            }
        }
    }
    best.map(|(s, _)| s)
}

/// Localize the book search window from the ASR prefix, per spec §4.6
/// step 2. Returns `None` when no heading cue is found or nothing matches.
pub fn localize(asr_words: &[&str], book: &BookIndex) -> Option<SectionMatch> {
    let prefix_words: Vec<&str> = asr_words.iter().take(PREFIX_LOOKAHEAD).copied().collect();
    let prefix_tokens = normalize_words(&prefix_words);
    if prefix_tokens.is_empty() {
        return None;
    }

    let matched: Option<&BookSection> = match find_heading_cue(&prefix_tokens) {
        Some(HeadingCue::Chapter { number, letter }) => book.sections.iter().find(|s| {
            let title_tokens = section_title_tokens(s);
            section_chapter_number(&title_tokens)
                .map(|(n, l)| n == number && l.as_deref().map(str::to_lowercase) == letter.as_ref().map(|x| x.to_lowercase()))
                .unwrap_or(false)
        }),
        Some(HeadingCue::Keyword(kind)) => book.sections.iter().find(|s| s.kind == kind),
        None => None,
    };

    let matched = matched.or_else(|| fuzzy_best_match(&prefix_tokens, &book.sections))?;

    Some(SectionMatch {
        section_id: matched.id.clone(),
        start_word: matched.start_word,
        end_word: matched.end_word,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::book::WordRange;

    fn section(id: &str, title: &str, kind: SectionKind, start: usize, end: usize) -> BookSection {
        BookSection {
            id: id.to_string(),
            title: title.to_string(),
            level: 1,
            kind,
            start_word: start,
            end_word: end,
            start_paragraph: 0,
            end_paragraph: 0,
        }
    }

    fn book_with_sections(sections: Vec<BookSection>, total_words: usize) -> BookIndex {
        use crate::model::book::{BookParagraph, BookSentence, BookTotals, BookWord, ParagraphKind};
        BookIndex {
            source_file: "book.docx".to_string(),
            source_file_hash: "x".to_string(),
            indexed_at: chrono::Utc::now(),
            title: None,
            author: None,
            totals: BookTotals { words: total_words, sentences: 1, paragraphs: 1, estimated_duration_sec: 100.0 },
            words: (0..total_words)
                .map(|i| BookWord {
                    text: format!("w{i}"),
                    word_index: i,
                    sentence_index: 0,
                    paragraph_index: 0,
                    section_index: None,
                    phonemes: None,
                })
                .collect(),
            sentences: vec![BookSentence { range: WordRange { start: 0, end: total_words.saturating_sub(1) } }],
            paragraphs: vec![BookParagraph {
                range: WordRange { start: 0, end: total_words.saturating_sub(1) },
                kind: ParagraphKind::Body,
                style: "Normal".to_string(),
            }],
            sections,
        }
    }

    #[test]
    fn matches_spelled_out_chapter_number() {
        let book = book_with_sections(
            vec![
                section("ch13", "Chapter 13: Calm", SectionKind::Chapter, 0, 99),
                section("ch14", "Chapter 14: Storm", SectionKind::Chapter, 100, 199),
            ],
            200,
        );
        let asr = ["chapter", "fourteen", "storm", "the", "wind", "howled"];
        let m = localize(&asr, &book).expect("should localize");
        assert_eq!(m.section_id, "ch14");
        assert_eq!(m.start_word, 100);
        assert_eq!(m.end_word, 199);
    }

    #[test]
    fn matches_chapter_with_letter_suffix_spoken_separately() {
        let book = book_with_sections(vec![section("ch28a", "Chapter 28A", SectionKind::Chapter, 50, 120)], 200);
        let asr = ["chapter", "28", "a"];
        let m = localize(&asr, &book).expect("should localize");
        assert_eq!(m.section_id, "ch28a");
    }

    #[test]
    fn matches_chapter_with_letter_suffix_glued() {
        let book = book_with_sections(vec![section("ch28a", "Chapter 28A", SectionKind::Chapter, 50, 120)], 200);
        let asr = ["chapter", "28A"];
        let m = localize(&asr, &book).expect("should localize");
        assert_eq!(m.section_id, "ch28a");
    }

    #[test]
    fn matches_single_word_heading_keyword() {
        let book = book_with_sections(vec![section("pro", "Prologue", SectionKind::Prologue, 0, 40)], 200);
        let asr = ["prologue", "it", "was", "a", "dark", "night"];
        let m = localize(&asr, &book).expect("should localize");
        assert_eq!(m.section_id, "pro");
    }

    #[test]
    fn falls_back_to_fuzzy_heading_match() {
        let book = book_with_sections(vec![section("s1", "The Black Forest", SectionKind::Chapter, 0, 40)], 200);
        let asr = ["the", "black", "forest", "was", "dark"];
        let m = localize(&asr, &book).expect("should localize via fuzzy match");
        assert_eq!(m.section_id, "s1");
    }

    #[test]
    fn returns_none_when_nothing_matches() {
        let book = book_with_sections(vec![section("s1", "The Black Forest", SectionKind::Chapter, 0, 40)], 200);
        let asr = ["zephyr", "quartz", "nonsense", "words"];
        assert!(localize(&asr, &book).is_none());
    }
}
