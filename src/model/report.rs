//! Comparison and validation report artifacts (spec §3, §4.11).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub wer: f64,
    pub cer: f64,
    pub opening_retention0_10s: f64,
    pub short_phrase_loss_rate: f64,
    pub seam_duplications: u32,
    pub seam_omissions: u32,
    pub anchor_coverage: f64,
    pub anchor_drift_p50: f64,
    pub anchor_drift_p95: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub window_id: String,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceMetrics {
    pub sentence_id: String,
    pub wer: f64,
    pub cer: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub chapter: Metrics,
    pub windows: Vec<WindowMetrics>,
    pub sentences: Vec<SentenceMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    pub name: String,
    pub threshold: f64,
    pub actual: f64,
    pub pass: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairSuggestion {
    pub window_id: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairPlan {
    pub windows: Vec<RepairSuggestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateReport {
    pub gates: Vec<Gate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_plan: Option<RepairPlan>,
}

impl ValidateReport {
    pub fn all_pass(&self) -> bool {
        self.gates.iter().all(|g| g.pass)
    }

    pub fn failing_gate_count(&self) -> usize {
        self.gates.iter().filter(|g| !g.pass).count()
    }
}

/// Default gate thresholds (spec §4.11).
#[derive(Debug, Clone)]
pub struct GateThresholds {
    pub opening_retention_min: f64,
    pub seam_duplications_max: u32,
    pub seam_omissions_max: u32,
    pub short_phrase_loss_rate_max: f64,
    pub anchor_drift_p95_max: f64,
    pub anchor_coverage_min: f64,
    pub wer_max: f64,
    pub cer_max: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            opening_retention_min: 0.995,
            seam_duplications_max: 0,
            seam_omissions_max: 0,
            short_phrase_loss_rate_max: 0.005,
            anchor_drift_p95_max: 0.8,
            anchor_coverage_min: 0.85,
            wer_max: 0.15,
            cer_max: 0.10,
        }
    }
}
