//! `BookIndex`: the canonical, tokenized, structurally segmented
//! representation of a book, produced by the (external) document-parsing
//! collaborator and consumed as-is by the pipeline (spec §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTotals {
    pub words: usize,
    pub sentences: usize,
    pub paragraphs: usize,
    pub estimated_duration_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookWord {
    /// Exact, unnormalized text as it appears in the source.
    pub text: String,
    pub word_index: usize,
    pub sentence_index: usize,
    pub paragraph_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phonemes: Option<Vec<String>>,
}

/// An inclusive `[start, end]` word-index range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WordRange {
    pub start: usize,
    pub end: usize,
}

impl WordRange {
    pub fn contains(&self, idx: usize) -> bool {
        idx >= self.start && idx <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParagraphKind {
    Body,
    Heading,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookParagraph {
    #[serde(flatten)]
    pub range: WordRange,
    pub kind: ParagraphKind,
    /// Source style token (e.g. "Heading1", "Normal").
    pub style: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSentence {
    #[serde(flatten)]
    pub range: WordRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Chapter,
    Prologue,
    Epilogue,
    Preface,
    FrontMatter,
    BackMatter,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSection {
    pub id: String,
    pub title: String,
    pub level: u32,
    pub kind: SectionKind,
    pub start_word: usize,
    pub end_word: usize,
    pub start_paragraph: usize,
    pub end_paragraph: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookIndex {
    pub source_file: String,
    pub source_file_hash: String,
    pub indexed_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub totals: BookTotals,
    pub words: Vec<BookWord>,
    pub sentences: Vec<BookSentence>,
    pub paragraphs: Vec<BookParagraph>,
    pub sections: Vec<BookSection>,
}

impl BookIndex {
    /// Validate the partition invariants spec §3/§8 (Testable Property 1)
    /// require: `words.len() == totals.words`, and sentences/paragraphs
    /// partition the word range completely with no gaps or overlaps.
    pub fn validate(&self) -> Result<(), String> {
        if self.words.len() != self.totals.words {
            return Err(format!(
                "words.len() ({}) != totals.words ({})",
                self.words.len(),
                self.totals.words
            ));
        }
        validate_partition(&self.sentences.iter().map(|s| s.range).collect::<Vec<_>>(), self.totals.words, "sentences")?;
        validate_partition(&self.paragraphs.iter().map(|p| p.range).collect::<Vec<_>>(), self.totals.words, "paragraphs")?;

        for section in &self.sections {
            if section.end_word >= self.totals.words || section.start_word > section.end_word {
                return Err(format!("section {} has an invalid word range", section.id));
            }
        }
        Ok(())
    }

    pub fn word_time_estimate(&self, word_index: usize) -> f64 {
        if self.totals.words == 0 {
            return 0.0;
        }
        let words_per_sec = self.totals.words as f64 / self.totals.estimated_duration_sec.max(1e-6);
        word_index as f64 / words_per_sec
    }
}

fn validate_partition(ranges: &[WordRange], total_words: usize, label: &str) -> Result<(), String> {
    if total_words == 0 {
        return if ranges.is_empty() {
            Ok(())
        } else {
            Err(format!("{label}: non-empty ranges over an empty book"))
        };
    }
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|r| r.start);

    let mut expected_start = 0usize;
    for r in &sorted {
        if r.start != expected_start {
            return Err(format!(
                "{label}: gap or overlap before word {} (expected start {})",
                r.start, expected_start
            ));
        }
        if r.end < r.start {
            return Err(format!("{label}: inverted range [{}, {}]", r.start, r.end));
        }
        expected_start = r.end + 1;
    }
    if expected_start != total_words {
        return Err(format!(
            "{label}: ranges cover up to {} but totals.words is {}",
            expected_start - 1,
            total_words
        ));
    }
    Ok(())
}
