//! Per-chunk and merged transcript artifacts (spec §3, §4.5, §6.2).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A single chunk's transcript, with chunk-relative word times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub chunk_id: String,
    pub text: String,
    pub words: Vec<TranscriptWord>,
    pub duration_sec: f64,
    pub tool_versions: BTreeMap<String, String>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// A transcript word after rebasing chunk-relative times into chapter
/// coordinates via the owning chunk's `span.start` (spec §3: "Transcript").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub chunk_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedTranscript {
    pub words: Vec<MergedWord>,
    pub text: String,
}

/// Rebase a chunk transcript's words into chapter-relative time.
pub fn rebase(transcript: &Transcript, chunk_start: f64) -> Vec<MergedWord> {
    transcript
        .words
        .iter()
        .map(|w| MergedWord {
            word: w.word.clone(),
            start: w.start + chunk_start,
            end: w.end + chunk_start,
            confidence: w.confidence,
            chunk_id: transcript.chunk_id.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebase_adds_chunk_offset() {
        let transcript = Transcript {
            chunk_id: "chunk_001".to_string(),
            text: "hello world".to_string(),
            words: vec![
                TranscriptWord { word: "hello".to_string(), start: 0.0, end: 0.4, confidence: Some(0.9) },
                TranscriptWord { word: "world".to_string(), start: 0.5, end: 1.0, confidence: Some(0.9) },
            ],
            duration_sec: 1.0,
            tool_versions: BTreeMap::new(),
            generated_at: chrono::Utc::now(),
        };

        let rebased = rebase(&transcript, 60.0);
        assert_eq!(rebased[0].start, 60.0);
        assert_eq!(rebased[1].end, 61.0);
    }
}
