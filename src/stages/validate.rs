//! Validator stage (spec §4.11): evaluates gates against a [`ComparisonReport`]
//! and, on failure, emits a repair plan naming the offending windows rather
//! than treating a failing gate as a runtime error (spec §9 REDESIGN FLAGS).

use std::collections::BTreeMap;

use crate::error::PipelineError;
use crate::json_canon::canonical_pretty;
use crate::manifest::Manifest;
use crate::model::report::{ComparisonReport, Gate, GateThresholds, RepairPlan, RepairSuggestion, ValidateReport};
use crate::runner::{check_fingerprint, record_completed, record_failed, StageOutcome};
use crate::stages::common::{completed_status, write_meta, write_params_snapshot, write_status};
use crate::workdir::{atomic_write, WorkDir};

const STAGE: &str = "validate";

fn evaluate_gates(report: &ComparisonReport, thresholds: &GateThresholds) -> Vec<Gate> {
    let m = &report.chapter;
    vec![
        Gate { name: "openingRetention".to_string(), threshold: thresholds.opening_retention_min, actual: m.opening_retention0_10s, pass: m.opening_retention0_10s >= thresholds.opening_retention_min },
        Gate { name: "seamDuplications".to_string(), threshold: thresholds.seam_duplications_max as f64, actual: m.seam_duplications as f64, pass: m.seam_duplications <= thresholds.seam_duplications_max },
        Gate { name: "seamOmissions".to_string(), threshold: thresholds.seam_omissions_max as f64, actual: m.seam_omissions as f64, pass: m.seam_omissions <= thresholds.seam_omissions_max },
        Gate { name: "shortPhraseLossRate".to_string(), threshold: thresholds.short_phrase_loss_rate_max, actual: m.short_phrase_loss_rate, pass: m.short_phrase_loss_rate <= thresholds.short_phrase_loss_rate_max },
        Gate { name: "anchorDriftP95".to_string(), threshold: thresholds.anchor_drift_p95_max, actual: m.anchor_drift_p95, pass: m.anchor_drift_p95 <= thresholds.anchor_drift_p95_max },
        Gate { name: "anchorCoverage".to_string(), threshold: thresholds.anchor_coverage_min, actual: m.anchor_coverage, pass: m.anchor_coverage >= thresholds.anchor_coverage_min },
        Gate { name: "wer".to_string(), threshold: thresholds.wer_max, actual: m.wer, pass: m.wer <= thresholds.wer_max },
        Gate { name: "cer".to_string(), threshold: thresholds.cer_max, actual: m.cer, pass: m.cer <= thresholds.cer_max },
    ]
}

/// Named the failing windows and suggests a remedy: a window whose CER
/// dominates its WER points at a trimming problem (more padding), one
/// whose WER dominates points at a missed anchor.
fn repair_plan(report: &ComparisonReport, thresholds: &GateThresholds) -> RepairPlan {
    let windows = report
        .windows
        .iter()
        .filter(|w| w.metrics.wer > thresholds.wer_max || w.metrics.cer > thresholds.cer_max)
        .map(|w| {
            let mut suggestions = Vec::new();
            if w.metrics.cer > thresholds.cer_max && w.metrics.cer >= w.metrics.wer {
                suggestions.push("increase pad".to_string());
            }
            if w.metrics.wer > thresholds.wer_max {
                suggestions.push("add soft anchor".to_string());
            }
            if suggestions.is_empty() {
                suggestions.push("increase pad".to_string());
            }
            RepairSuggestion { window_id: w.window_id.clone(), suggestions }
        })
        .collect();
    RepairPlan { windows }
}

pub fn run(
    work_dir: &WorkDir,
    manifest: &mut Manifest,
    report: &ComparisonReport,
    thresholds: GateThresholds,
) -> Result<StageOutcome, PipelineError> {
    let tool_versions = BTreeMap::new();
    let threshold_snapshot = ThresholdSnapshot::from(&thresholds);
    let (fp, up_to_date) = check_fingerprint(manifest, STAGE, report, &threshold_snapshot, &tool_versions)?;
    if up_to_date {
        return Ok(StageOutcome::Skipped);
    }

    let gates = evaluate_gates(report, &thresholds);
    let all_pass = gates.iter().all(|g| g.pass);

    let validate_report = if all_pass {
        ValidateReport { gates, repair_plan: None }
    } else {
        ValidateReport { gates, repair_plan: Some(repair_plan(report, &thresholds)) }
    };

    let stage_dir = work_dir.ensure_stage_dir(STAGE)?;
    write_params_snapshot(&stage_dir, &threshold_snapshot)?;
    write_meta(&stage_dir, &tool_versions)?;
    atomic_write(&stage_dir.join("report.json"), canonical_pretty(&validate_report)?.as_bytes())?;

    if all_pass {
        write_status(&stage_dir, completed_status())?;
        let artifacts = BTreeMap::from([("report".to_string(), "report.json".to_string())]);
        record_completed(manifest, STAGE, fp, artifacts.clone());
        return Ok(StageOutcome::Completed { artifacts });
    }

    let repair = validate_report.repair_plan.clone().unwrap_or_default();
    let repair_dir = stage_dir.join("repair");
    std::fs::create_dir_all(&repair_dir)?;
    atomic_write(&repair_dir.join("repair.plan.json"), canonical_pretty(&repair)?.as_bytes())?;

    let err = PipelineError::GateFailure(Box::new(validate_report));
    record_failed(manifest, STAGE, &err);
    Ok(StageOutcome::GateFailed(Box::new(repair)))
}

#[derive(serde::Serialize)]
struct ThresholdSnapshot {
    opening_retention_min: f64,
    seam_duplications_max: u32,
    seam_omissions_max: u32,
    short_phrase_loss_rate_max: f64,
    anchor_drift_p95_max: f64,
    anchor_coverage_min: f64,
    wer_max: f64,
    cer_max: f64,
}

impl From<&GateThresholds> for ThresholdSnapshot {
    fn from(t: &GateThresholds) -> Self {
        Self {
            opening_retention_min: t.opening_retention_min,
            seam_duplications_max: t.seam_duplications_max,
            seam_omissions_max: t.seam_omissions_max,
            short_phrase_loss_rate_max: t.short_phrase_loss_rate_max,
            anchor_drift_p95_max: t.anchor_drift_p95_max,
            anchor_coverage_min: t.anchor_coverage_min,
            wer_max: t.wer_max,
            cer_max: t.cer_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::InputInfo;
    use crate::model::report::{Metrics, WindowMetrics};
    use tempfile::tempdir;

    fn sample_input() -> InputInfo {
        InputInfo { path: "chapter.wav".to_string(), sha256: "abc".to_string(), duration_sec: 21.0, size_bytes: 100, mtime_utc: chrono::Utc::now() }
    }

    fn passing_metrics() -> Metrics {
        Metrics {
            wer: 0.01,
            cer: 0.01,
            opening_retention0_10s: 1.0,
            short_phrase_loss_rate: 0.0,
            seam_duplications: 0,
            seam_omissions: 0,
            anchor_coverage: 1.0,
            anchor_drift_p50: 0.1,
            anchor_drift_p95: 0.2,
        }
    }

    #[test]
    fn all_gates_pass_records_a_completed_stage() {
        let dir = tempdir().unwrap();
        let work_dir = WorkDir::explicit(dir.path().to_path_buf());
        let mut manifest = Manifest::new(sample_input());
        let report = ComparisonReport { chapter: passing_metrics(), windows: vec![], sentences: vec![] };

        let outcome = run(&work_dir, &mut manifest, &report, GateThresholds::default()).unwrap();
        assert!(matches!(outcome, StageOutcome::Completed { .. }));
    }

    #[test]
    fn a_failing_gate_produces_a_repair_plan_naming_the_window() {
        let dir = tempdir().unwrap();
        let work_dir = WorkDir::explicit(dir.path().to_path_buf());
        let mut manifest = Manifest::new(sample_input());

        let mut chapter = passing_metrics();
        chapter.wer = 0.5;
        let windows = vec![WindowMetrics {
            window_id: "w1".to_string(),
            metrics: Metrics { wer: 0.5, ..passing_metrics() },
        }];
        let report = ComparisonReport { chapter, windows, sentences: vec![] };

        let outcome = run(&work_dir, &mut manifest, &report, GateThresholds::default()).unwrap();
        match outcome {
            StageOutcome::GateFailed(plan) => {
                assert_eq!(plan.windows.len(), 1);
                assert_eq!(plan.windows[0].window_id, "w1");
                assert!(plan.windows[0].suggestions.contains(&"add soft anchor".to_string()));
            }
            _ => panic!("expected GateFailed"),
        }
    }

    #[test]
    fn zero_seam_duplications_threshold_rejects_any_duplication() {
        let mut chapter = passing_metrics();
        chapter.seam_duplications = 1;
        let report = ComparisonReport { chapter, windows: vec![], sentences: vec![] };
        let gates = evaluate_gates(&report, &GateThresholds::default());
        let seam_gate = gates.iter().find(|g| g.name == "seamDuplications").unwrap();
        assert!(!seam_gate.pass);
    }
}
