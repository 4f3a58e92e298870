//! Window planner DP (spec §4.3).
//!
//! Selects monotone cut points `0 = c_0 < c_1 < … < c_N = D` from the
//! silence midpoints `M ∪ {0, D}` minimizing `Σ (length − target)²`
//! subject to `length ∈ [min, max]`. Deterministic O(|M|²) table fill;
//! ties broken by (lower total cost, fewer windows, leftmost predecessor).

use crate::error::PipelineError;
use crate::model::{PlanParams, PlannedWindow, WindowPlan};

#[derive(Debug, Clone, Copy)]
struct Cell {
    cost: f64,
    windows: u32,
    predecessor: usize,
}

/// Fill the DP table over `points` (sorted, deduped, including 0 and D).
/// `relax_last` lifts the `max` bound on edges that land on the final
/// point, used for the tailRelaxed fallback.
fn fill(points: &[f64], min: f64, max: f64, target: f64, relax_last: bool) -> Vec<Option<Cell>> {
    let n = points.len();
    let mut dp: Vec<Option<Cell>> = vec![None; n];
    dp[0] = Some(Cell { cost: 0.0, windows: 0, predecessor: 0 });

    for i in 1..n {
        let mut best: Option<Cell> = None;
        for j in 0..i {
            let Some(prev) = dp[j] else { continue };
            let length = points[i] - points[j];
            let upper_ok = length <= max || (relax_last && i == n - 1);
            if length < min || !upper_ok {
                continue;
            }
            let cost = prev.cost + (length - target).powi(2);
            let windows = prev.windows + 1;
            let candidate = Cell { cost, windows, predecessor: j };
            best = Some(match best {
                None => candidate,
                Some(cur) => {
                    if is_better(&candidate, &cur) {
                        candidate
                    } else {
                        cur
                    }
                }
            });
        }
        dp[i] = best;
    }

    dp
}

/// Tie-break order: lower cost; then fewer windows; then leftmost
/// predecessor (smaller cut index).
fn is_better(candidate: &Cell, current: &Cell) -> bool {
    if (candidate.cost - current.cost).abs() > 1e-9 {
        return candidate.cost < current.cost;
    }
    if candidate.windows != current.windows {
        return candidate.windows < current.windows;
    }
    candidate.predecessor < current.predecessor
}

fn reconstruct(points: &[f64], dp: &[Option<Cell>]) -> Vec<PlannedWindow> {
    let mut path = vec![points.len() - 1];
    let mut cur = points.len() - 1;
    while cur != 0 {
        let cell = dp[cur].expect("reconstruct called on infeasible dp table");
        cur = cell.predecessor;
        path.push(cur);
    }
    path.reverse();
    path.windows(2)
        .map(|w| PlannedWindow { start: points[w[0]], end: points[w[1]] })
        .collect()
}

/// Plan windows covering `[0, duration_sec]` using silence midpoints as
/// candidate cut points.
pub fn plan_windows(
    duration_sec: f64,
    midpoints: &[f64],
    params: &PlanParams,
) -> Result<WindowPlan, PipelineError> {
    let mut points: Vec<f64> = std::iter::once(0.0)
        .chain(midpoints.iter().copied().filter(|&m| m > 0.0 && m < duration_sec))
        .chain(std::iter::once(duration_sec))
        .collect();
    points.sort_by(|a, b| a.partial_cmp(b).unwrap());
    points.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    let dp = fill(&points, params.min, params.max, params.target, false);
    let last = points.len() - 1;

    if let Some(cell) = dp[last] {
        let windows = reconstruct(&points, &dp);
        return Ok(WindowPlan { windows, params: params.clone(), total_cost: cell.cost, tail_relaxed: false });
    }

    if params.strict_tail {
        return Err(PipelineError::ConstraintViolation(format!(
            "no feasible window plan for duration {duration_sec}s with min={}, max={}, strictTail=true",
            params.min, params.max
        )));
    }

    let relaxed = fill(&points, params.min, params.max, params.target, true);
    match relaxed[last] {
        Some(cell) => {
            let windows = reconstruct(&points, &relaxed);
            Ok(WindowPlan { windows, params: params.clone(), total_cost: cell.cost, tail_relaxed: true })
        }
        None => Err(PipelineError::ConstraintViolation(format!(
            "no feasible window plan for duration {duration_sec}s even with a relaxed tail (min={})",
            params.min
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PlanParams {
        PlanParams { min: 5.0, max: 15.0, target: 10.0, strict_tail: false }
    }

    #[test]
    fn covers_full_duration_contiguously() {
        let plan = plan_windows(21.0, &[10.5], &params()).unwrap();
        assert_eq!(plan.windows.first().unwrap().start, 0.0);
        assert_eq!(plan.windows.last().unwrap().end, 21.0);
        for pair in plan.windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(!plan.tail_relaxed);
    }

    #[test]
    fn respects_min_max_bounds() {
        let plan = plan_windows(21.0, &[10.5], &params()).unwrap();
        for w in &plan.windows {
            let len = w.duration();
            assert!(len >= 5.0 - 1e-9 && len <= 15.0 + 1e-9);
        }
    }

    #[test]
    fn falls_back_to_tail_relaxed_when_infeasible() {
        // No silence at all in a duration that can't be split into a
        // single [5,15] window; strictTail=false must admit an overlong tail.
        let plan = plan_windows(40.0, &[], &params()).unwrap();
        assert!(plan.tail_relaxed);
        assert_eq!(plan.windows.len(), 1);
        assert_eq!(plan.windows[0].end, 40.0);
    }

    #[test]
    fn strict_tail_fails_loudly_when_infeasible() {
        let mut p = params();
        p.strict_tail = true;
        let err = plan_windows(40.0, &[], &p).unwrap_err();
        assert!(matches!(err, PipelineError::ConstraintViolation(_)));
    }

    #[test]
    fn prefers_lower_cost_over_fewer_windows() {
        // Two plausible cuts near the midpoint; DP should pick whichever
        // minimizes squared deviation from target, not merely window count.
        let plan = plan_windows(20.0, &[9.0, 11.0], &params()).unwrap();
        assert_eq!(plan.windows.len(), 2);
    }
}
