//! Working-directory layout and atomic-write discipline (spec §6.1).
//!
//! ```text
//! <input>.ams/
//!   manifest.json
//!   book-index.json
//!   timeline/silence.json + params.snapshot.json + status.json + meta.json
//!   plan/windows.json + ...
//!   chunks/index.json + wav/<id>.wav + ...
//!   transcripts/<chunkId>.json + index.json + merged.json
//!   anchors/anchors.json
//!   windows/windows.json
//!   window-align/<windowId>.aeneas.json + index.json
//!   refine/sentences.json
//!   collate/final.wav + segments.json + map.json + log.json
//!   script-compare/report.json + map.jsonl
//!   validate/report.json (+ repair/repair.plan.json)
//! ```

use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Owns the on-disk layout for a single pipeline run against one input file.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Derive the working directory for `input_path`: `<input>.ams/`.
    pub fn for_input(input_path: &Path) -> Self {
        let mut root = input_path.as_os_str().to_owned();
        root.push(".ams");
        Self { root: PathBuf::from(root) }
    }

    pub fn explicit(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    pub fn book_index_path(&self) -> PathBuf {
        self.root.join("book-index.json")
    }

    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.root.join(stage)
    }

    /// Ensure the run root and a stage's directory exist.
    pub fn ensure_stage_dir(&self, stage: &str) -> Result<PathBuf, PipelineError> {
        let dir = self.stage_dir(stage);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Write `bytes` to `path` via a temp file in the same directory followed
/// by an atomic rename, so a reader never observes a partially-written
/// file and a failed write never corrupts the previous artifact.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let dir = path.parent().ok_or_else(|| {
        PipelineError::InvalidInput(format!("path has no parent: {}", path.display()))
    })?;
    std::fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::InvalidInput(format!("invalid path: {}", path.display())))?;
    let tmp_path = dir.join(format!(".{file_name}.tmp-{}", std::process::id()));

    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Normalize a path to POSIX form for handing to an external service,
/// centralizing the Windows↔POSIX mapping spec §4.8/§6.3 leaves to the
/// caller.
pub fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    if let Some(stripped) = s.strip_prefix("//?/") {
        stripped.to_string()
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn work_dir_suffix() {
        let wd = WorkDir::for_input(Path::new("chapter01.wav"));
        assert_eq!(wd.root(), Path::new("chapter01.wav.ams"));
    }

    #[test]
    fn atomic_write_produces_final_file_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub/out.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("sub"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn normalize_path_flips_backslashes() {
        assert_eq!(normalize_path(Path::new(r"C:\a\b")), "C:/a/b");
    }
}
