//! Manifest store: schema "asr-manifest/v2".
//!
//! The manifest is the sole mutable document in a pipeline run. Every
//! stage reads it to decide skip-vs-run and writes back its status,
//! artifacts, and fingerprint when it completes (spec §3, §4.1).

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::fingerprint::Fingerprint;
use crate::json_canon::canonical_pretty;
use crate::workdir::atomic_write;

pub const SCHEMA_VERSION: &str = "asr-manifest/v2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusBlock {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended: Option<DateTime<Utc>>,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusBlock {
    pub fn pending() -> Self {
        Self {
            status: StageStatus::Pending,
            started: None,
            ended: None,
            attempts: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageEntry {
    pub status: StatusBlock,
    /// Logical artifact name -> path relative to the stage directory.
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

impl StageEntry {
    pub fn pending() -> Self {
        Self {
            status: StatusBlock::pending(),
            artifacts: BTreeMap::new(),
            fingerprint: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status.status == StageStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputInfo {
    pub path: String,
    pub sha256: String,
    pub duration_sec: f64,
    pub size_bytes: u64,
    pub mtime_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: String,
    pub input: InputInfo,
    pub stages: BTreeMap<String, StageEntry>,
}

impl Manifest {
    pub fn new(input: InputInfo) -> Self {
        Self {
            schema: SCHEMA_VERSION.to_string(),
            input,
            stages: BTreeMap::new(),
        }
    }

    /// Load a manifest from disk, or construct a fresh one against `input`
    /// if the file does not exist yet.
    pub fn load_or_init(path: &Path, input: InputInfo) -> Result<Self, PipelineError> {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            let manifest: Manifest = serde_json::from_str(&text)
                .map_err(|e| PipelineError::ArtifactCorruption(format!("manifest: {e}")))?;
            if manifest.schema != SCHEMA_VERSION {
                return Err(PipelineError::ArtifactCorruption(format!(
                    "manifest schema mismatch: expected {SCHEMA_VERSION}, found {}",
                    manifest.schema
                )));
            }
            Ok(manifest)
        } else {
            Ok(Manifest::new(input))
        }
    }

    /// Atomically persist the manifest (temp file + rename), canonical JSON.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let text = canonical_pretty(self)?;
        atomic_write(path, text.as_bytes())?;
        Ok(())
    }

    pub fn stage(&self, name: &str) -> Option<&StageEntry> {
        self.stages.get(name)
    }

    pub fn set_stage(&mut self, name: &str, entry: StageEntry) {
        self.stages.insert(name.to_string(), entry);
    }

    /// Invalidate the fingerprint (and hence force-rerun) of `name` and
    /// every stage topologically after it, per `--force` semantics (spec
    /// §4.1).
    pub fn invalidate_from(&mut self, name: &str, topo_order: &[&str]) {
        let Some(pos) = topo_order.iter().position(|s| *s == name) else {
            return;
        };
        for stage_name in &topo_order[pos..] {
            if let Some(entry) = self.stages.get_mut(*stage_name) {
                entry.fingerprint = None;
                entry.status = StatusBlock::pending();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_input() -> InputInfo {
        InputInfo {
            path: "chapter01.wav".to_string(),
            sha256: "deadbeef".to_string(),
            duration_sec: 120.0,
            size_bytes: 4096,
            mtime_utc: Utc::now(),
        }
    }

    #[test]
    fn load_or_init_creates_fresh_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = Manifest::load_or_init(&path, sample_input()).unwrap();
        assert_eq!(manifest.schema, SCHEMA_VERSION);
        assert!(manifest.stages.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut manifest = Manifest::load_or_init(&path, sample_input()).unwrap();
        manifest.set_stage("timeline", StageEntry::pending());
        manifest.save(&path).unwrap();

        let reloaded = Manifest::load_or_init(&path, sample_input()).unwrap();
        assert!(reloaded.stage("timeline").is_some());
    }

    #[test]
    fn invalidate_from_clears_downstream_fingerprints() {
        let mut manifest = Manifest::new(sample_input());
        let order = ["timeline", "plan", "chunks"];
        for name in &order {
            let mut entry = StageEntry::pending();
            entry.status.status = StageStatus::Completed;
            manifest.set_stage(name, entry);
        }
        manifest.invalidate_from("plan", &order);

        assert_eq!(
            manifest.stage("timeline").unwrap().status.status,
            StageStatus::Completed
        );
        assert_eq!(
            manifest.stage("plan").unwrap().status.status,
            StageStatus::Pending
        );
        assert_eq!(
            manifest.stage("chunks").unwrap().status.status,
            StageStatus::Pending
        );
    }
}
