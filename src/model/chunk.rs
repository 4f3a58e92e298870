//! Chunk index artifact (spec §3, §4.4).

use serde::{Deserialize, Serialize};

use crate::model::plan::PlannedWindow;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEntry {
    pub id: String,
    pub span: PlannedWindow,
    pub filename: String,
    pub sha256: String,
    pub duration_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkIndex {
    pub chunks: Vec<ChunkEntry>,
}

impl ChunkIndex {
    /// Stable 1-based, zero-padded chunk id, e.g. `chunk_001`.
    pub fn id_for(index: usize, total: usize) -> String {
        let width = total.to_string().len().max(3);
        format!("chunk_{:0width$}", index + 1, width = width)
    }
}
