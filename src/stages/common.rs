//! Shared per-stage side-file writers (spec §4.1): every stage directory
//! carries `params.snapshot.json`, `meta.json` (tool versions + timestamp),
//! and `status.json` alongside its real artifacts.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::error::PipelineError;
use crate::json_canon::canonical_pretty;
use crate::manifest::{StageStatus, StatusBlock};
use crate::workdir::atomic_write;

pub fn write_params_snapshot<P: Serialize>(stage_dir: &Path, params: &P) -> Result<(), PipelineError> {
    let text = canonical_pretty(params)?;
    atomic_write(&stage_dir.join("params.snapshot.json"), text.as_bytes())
}

#[derive(Serialize)]
struct Meta<'a> {
    #[serde(rename = "toolVersions")]
    tool_versions: &'a BTreeMap<String, String>,
    #[serde(rename = "generatedAt")]
    generated_at: chrono::DateTime<Utc>,
}

pub fn write_meta(stage_dir: &Path, tool_versions: &BTreeMap<String, String>) -> Result<(), PipelineError> {
    let meta = Meta { tool_versions, generated_at: Utc::now() };
    let text = canonical_pretty(&meta)?;
    atomic_write(&stage_dir.join("meta.json"), text.as_bytes())
}

pub fn write_status(stage_dir: &Path, status: StatusBlock) -> Result<(), PipelineError> {
    let text = canonical_pretty(&status)?;
    atomic_write(&stage_dir.join("status.json"), text.as_bytes())
}

pub fn completed_status() -> StatusBlock {
    StatusBlock {
        status: StageStatus::Completed,
        started: Some(Utc::now()),
        ended: Some(Utc::now()),
        attempts: 1,
        error: None,
    }
}
