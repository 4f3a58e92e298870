//! Stage execution contract (spec §9 REDESIGN FLAGS): stages are plain
//! functions returning a [`StageOutcome`] sum type rather than throwing
//! exceptions on gate failure. Only truly exceptional conditions (I/O
//! faults, corrupt prior artifacts, unreachable services) propagate as
//! [`PipelineError`].

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

use crate::error::PipelineError;
use crate::fingerprint::{self, Fingerprint};
use crate::manifest::{Manifest, StageEntry, StageStatus, StatusBlock};
use crate::model::RepairPlan;

/// What happened when a stage was asked to run.
pub enum StageOutcome {
    /// The manifest's fingerprint already matched; the stage did no work.
    Skipped,
    /// The stage ran and wrote the listed artifact paths (relative to the
    /// stage's working directory).
    Completed { artifacts: BTreeMap<String, String> },
    /// The stage completed but its own gate check failed (currently only
    /// the validator produces this).
    GateFailed(Box<RepairPlan>),
}

/// A stage is a plain function from `(work_dir, ...)` to an outcome or a
/// fatal [`PipelineError`]. This trait exists only to name that shape for
/// the orchestrator; most stages are free functions matching it directly
/// rather than trait objects, since each stage's parameter and dependency
/// types differ.
pub trait Stage {
    fn name(&self) -> &'static str;
}

pub struct NamedStage {
    pub name: &'static str,
}

impl Stage for NamedStage {
    fn name(&self) -> &'static str {
        self.name
    }
}

/// Canonical stage name order used for `--from`/`--to`/`--force` topological
/// invalidation (spec §4.1, §6.5).
pub const STAGE_ORDER: &[&str] = &[
    "timeline",
    "plan",
    "chunks",
    "transcripts",
    "anchors",
    "windows",
    "window-align",
    "refine",
    "collate",
    "script-compare",
    "validate",
];

pub fn stage_index(name: &str) -> Option<usize> {
    STAGE_ORDER.iter().position(|&s| s == name)
}

/// Compute this stage's fingerprint and report whether the manifest's
/// stored entry already matches it (spec §4.1: "compute fingerprint; if
/// the stored entry is completed and fingerprint matches exactly, return
/// skipped").
pub fn check_fingerprint<I: Serialize, P: Serialize>(
    manifest: &Manifest,
    stage_name: &str,
    inputs: &I,
    params: &P,
    tool_versions: &BTreeMap<String, String>,
) -> Result<(Fingerprint, bool), PipelineError> {
    let fp = fingerprint::compute(inputs, params, tool_versions)?;
    let up_to_date = manifest
        .stage(stage_name)
        .map(|entry| entry.is_completed() && entry.fingerprint.as_ref() == Some(&fp))
        .unwrap_or(false);
    Ok((fp, up_to_date))
}

/// Record a successful stage run in the manifest: status, artifact map,
/// and the fingerprint that makes the next run's skip check possible.
pub fn record_completed(
    manifest: &mut Manifest,
    stage_name: &str,
    fingerprint: Fingerprint,
    artifacts: BTreeMap<String, String>,
) {
    let now = Utc::now();
    manifest.set_stage(
        stage_name,
        StageEntry {
            status: StatusBlock {
                status: StageStatus::Completed,
                started: Some(now),
                ended: Some(now),
                attempts: 1,
                error: None,
            },
            artifacts,
            fingerprint: Some(fingerprint),
        },
    );
}

/// Record a failed stage run: the manifest entry carries the error text,
/// but no fingerprint (so the next run always retries), per spec §7's
/// propagation policy.
pub fn record_failed(manifest: &mut Manifest, stage_name: &str, error: &PipelineError) {
    let now = Utc::now();
    let attempts = manifest.stage(stage_name).map(|e| e.status.attempts).unwrap_or(0) + 1;
    manifest.set_stage(
        stage_name,
        StageEntry {
            status: StatusBlock {
                status: StageStatus::Failed,
                started: None,
                ended: Some(now),
                attempts,
                error: Some(error.to_string()),
            },
            artifacts: BTreeMap::new(),
            fingerprint: None,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_the_documented_pipeline() {
        assert_eq!(stage_index("timeline"), Some(0));
        assert_eq!(stage_index("validate"), Some(10));
        assert_eq!(stage_index("nonexistent"), None);
    }
}
