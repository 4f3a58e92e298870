//! Book-manuscript-to-audio alignment pipeline.
//!
//! An eleven-stage, fingerprint-gated DAG (spec §4) that turns a raw chapter
//! recording plus a canonical book index into sentence-accurate timing data,
//! a collated master with silence tightened into room tone, and a QA report
//! that either passes or names exactly what to repair.

pub mod algo;
pub mod cancel;
pub mod error;
pub mod fingerprint;
pub mod json_canon;
pub mod manifest;
pub mod media;
pub mod model;
pub mod process;
pub mod runner;
pub mod services;
pub mod stages;
pub mod text;
pub mod workdir;

pub use cancel::CancellationToken;
pub use error::PipelineError;
pub use manifest::{InputInfo, Manifest};
pub use media::{FfmpegTool, MediaTool};
pub use runner::{StageOutcome, STAGE_ORDER};
pub use workdir::WorkDir;
