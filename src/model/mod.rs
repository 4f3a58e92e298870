pub mod alignment;
pub mod anchor;
pub mod book;
pub mod chunk;
pub mod collation;
pub mod plan;
pub mod report;
pub mod sentence;
pub mod silence;
pub mod transcript;
pub mod windows;

pub use alignment::{Fragment, WindowAlignment};
pub use anchor::{AnchorArtifact, AnchorCandidate, AnchorParams, AnchorSelected};
pub use book::{BookIndex, BookSection, BookWord};
pub use chunk::{ChunkEntry, ChunkIndex};
pub use collation::{CollationLog, CollationParams, CollationSegments, Replacement, SeamDecision};
pub use plan::{PlanParams, PlannedWindow, WindowPlan};
pub use report::{ComparisonReport, Gate, GateThresholds, RepairPlan, ValidateReport};
pub use sentence::{RefineParams, RefinedSentence, RefinedSentences, SentenceSource};
pub use silence::{SilenceDetectParams, SilenceEvent, SilenceTimeline};
pub use transcript::{MergedTranscript, MergedWord, Transcript, TranscriptWord};
pub use windows::{BuiltWindow, WindowsArtifact, WindowsParams};
