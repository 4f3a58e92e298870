//! Window plan artifact (spec §3, §4.3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanParams {
    pub min: f64,
    pub max: f64,
    pub target: f64,
    pub strict_tail: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlannedWindow {
    pub start: f64,
    pub end: f64,
}

impl PlannedWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowPlan {
    pub windows: Vec<PlannedWindow>,
    pub params: PlanParams,
    pub total_cost: f64,
    pub tail_relaxed: bool,
}
