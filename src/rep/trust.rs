//! Transitive trust over the rater→target rating graph.
//!
//! 評価グラフの冪乗法 (damped power iteration) で大域信頼度を計算する。
//! - 同じペアの複数評価は平均して1本のエッジに潰す
//! - 自己評価・ゼロ重みの行はエッジにならない
//! - 出エッジのないユーザーの質量は全員に均等再分配
//!
//! Collapsing before iterating is what makes the result resistant to a
//! rater hammering the same target: their influence on that edge is an
//! average, not a sum.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::store::Rating;

/// Normalize one 0-10 axis score to [0, 1]; missing counts as 0
pub fn normalize_axis(value: Option<i64>) -> f64 {
    match value {
        Some(v) => v.clamp(0, 10) as f64 / 10.0,
        None => 0.0,
    }
}

/// Local trust derived from a single rating row, in [0, 1]
pub fn local_trust(contribution: Option<i64>, communication: Option<i64>, would_work_again: bool) -> f64 {
    let wwa = if would_work_again { 1.0 } else { 0.0 };
    (normalize_axis(contribution) + normalize_axis(communication) + wwa) / 3.0
}

/// Accumulated stats for one ordered (rater, target) pair, over all teams
#[derive(Debug, Clone, Default)]
pub struct EdgeStats {
    pub local_sum: f64,
    pub count: u32,
    pub contrib_sum: f64,
    pub contrib_n: u32,
    pub comm_sum: f64,
    pub comm_n: u32,
    pub wwa_sum: f64,
    pub wwa_n: u32,
}

impl EdgeStats {
    /// Collapsed edge weight: mean local trust, in (0, 1]
    pub fn weight(&self) -> f64 {
        self.local_sum / self.count as f64
    }

    pub fn contribution_avg(&self) -> Option<f64> {
        (self.contrib_n > 0).then(|| self.contrib_sum / self.contrib_n as f64)
    }

    pub fn communication_avg(&self) -> Option<f64> {
        (self.comm_n > 0).then(|| self.comm_sum / self.comm_n as f64)
    }

    pub fn would_work_again_ratio(&self) -> f64 {
        if self.wwa_n == 0 {
            0.0
        } else {
            self.wwa_sum / self.wwa_n as f64
        }
    }
}

/// Collapse rating rows into one edge per ordered (rater, target) pair.
///
/// Rows with a missing endpoint, self rows, and rows with zero local trust
/// carry no edge mass and are skipped.
pub fn collapse_edges(rows: &[Rating]) -> BTreeMap<(i64, i64), EdgeStats> {
    let mut edges: BTreeMap<(i64, i64), EdgeStats> = BTreeMap::new();

    for row in rows {
        let (Some(rater), Some(target)) = (row.rater_id, row.target_user_id) else {
            continue;
        };
        if rater == target {
            continue;
        }

        let local = local_trust(row.contribution, row.communication, row.would_work_again);
        if local <= 0.0 {
            continue;
        }

        let stats = edges.entry((rater, target)).or_default();
        stats.local_sum += local;
        stats.count += 1;

        if let Some(c) = row.contribution {
            stats.contrib_sum += c.clamp(0, 10) as f64;
            stats.contrib_n += 1;
        }
        if let Some(k) = row.communication {
            stats.comm_sum += k.clamp(0, 10) as f64;
            stats.comm_n += 1;
        }
        stats.wwa_sum += if row.would_work_again { 1.0 } else { 0.0 };
        stats.wwa_n += 1;
    }

    edges
}

/// Tunables for the power iteration
#[derive(Debug, Clone, Copy)]
pub struct TrustParams {
    pub damping: f64,
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for TrustParams {
    fn default() -> Self {
        Self { damping: 0.85, max_iter: 50, tolerance: 1e-10 }
    }
}

/// Outcome of one trust computation
pub struct TrustRun {
    /// user id → trust weight; nonnegative, sums to 1 when any user exists
    pub scores: HashMap<i64, f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Damped power iteration over the row-stochastic collapsed edge matrix,
/// with uniform personalization and uniform dangling-mass redistribution.
///
/// Never fails: an empty user set yields an empty map, an empty edge set
/// yields the uniform 1/n vector. Hitting `max_iter` is reported (and
/// logged), not raised; the last vector is renormalized and returned.
/// A caller-supplied cancel flag is checked at iteration boundaries.
pub fn compute_trust(
    user_ids: &[i64],
    edges: &BTreeMap<(i64, i64), EdgeStats>,
    params: &TrustParams,
    cancel: Option<&AtomicBool>,
) -> TrustRun {
    let n = user_ids.len();
    if n == 0 {
        return TrustRun { scores: HashMap::new(), iterations: 0, converged: true };
    }

    let index: HashMap<i64, usize> = user_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    // Sparse outgoing adjacency; edges touching unknown ids carry no mass
    let mut out: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (&(rater, target), stats) in edges {
        let (Some(&ri), Some(&ti)) = (index.get(&rater), index.get(&target)) else {
            continue;
        };
        let w = stats.weight();
        if w <= 0.0 {
            continue;
        }
        out[ri].push((ti, w));
    }
    let row_sum: Vec<f64> = out.iter().map(|es| es.iter().map(|(_, w)| w).sum()).collect();

    let uniform = 1.0 / n as f64;
    let base = (1.0 - params.damping) * uniform;
    let mut t = vec![uniform; n];
    let mut iterations = 0;
    let mut converged = false;
    let mut cancelled = false;

    for iter in 0..params.max_iter {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                debug!("Trust iteration cancelled after {} iterations", iter);
                cancelled = true;
                break;
            }
        }

        let dangling: f64 = (0..n).filter(|&i| out[i].is_empty()).map(|i| t[i]).sum();
        let mut next = vec![base + params.damping * dangling * uniform; n];

        for i in 0..n {
            if out[i].is_empty() {
                continue;
            }
            let scale = params.damping * t[i] / row_sum[i];
            for &(j, w) in &out[i] {
                next[j] += scale * w;
            }
        }

        let delta: f64 = next.iter().zip(&t).map(|(a, b)| (a - b).abs()).sum();
        t = next;
        iterations = iter + 1;

        if delta < params.tolerance {
            converged = true;
            break;
        }
    }

    if !converged && !cancelled {
        warn!(
            "Trust iteration stopped after {} iterations without reaching tolerance {:e}",
            iterations, params.tolerance
        );
    }

    // Renormalize against accumulated floating-point drift
    let norm: f64 = t.iter().sum();
    if norm > 0.0 {
        for v in &mut t {
            *v /= norm;
        }
    }

    let scores = user_ids.iter().zip(t).map(|(&id, v)| (id, v)).collect();
    TrustRun { scores, iterations, converged }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(rater: i64, target: i64, contribution: i64, communication: i64, wwa: bool) -> Rating {
        Rating {
            id: None,
            team_id: Some(1),
            rater_id: Some(rater),
            target_user_id: Some(target),
            contribution: Some(contribution),
            communication: Some(communication),
            would_work_again: wwa,
            comment: None,
            created_at: None,
        }
    }

    fn trust_of(rows: &[Rating], user_ids: &[i64]) -> HashMap<i64, f64> {
        compute_trust(user_ids, &collapse_edges(rows), &TrustParams::default(), None).scores
    }

    fn assert_sums_to_one(scores: &HashMap<i64, f64>) {
        let sum: f64 = scores.values().sum();
        assert!((sum - 1.0).abs() <= 1e-9, "trust must sum to 1, got {}", sum);
        for (id, v) in scores {
            assert!(*v >= 0.0, "trust for {} must be nonnegative, got {}", id, v);
        }
    }

    #[test]
    fn test_normalize_axis_clamps_and_scales() {
        assert_eq!(normalize_axis(Some(10)), 1.0);
        assert_eq!(normalize_axis(Some(0)), 0.0);
        assert_eq!(normalize_axis(Some(5)), 0.5);
        assert_eq!(normalize_axis(Some(15)), 1.0, "values above 10 clamp to 1");
        assert_eq!(normalize_axis(Some(-3)), 0.0, "negative values clamp to 0");
        assert_eq!(normalize_axis(None), 0.0, "missing counts as 0");
    }

    #[test]
    fn test_local_trust_averages_three_components() {
        assert_eq!(local_trust(Some(10), Some(10), true), 1.0);
        assert_eq!(local_trust(Some(0), Some(0), false), 0.0);
        assert!((local_trust(Some(10), None, false) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_collapse_drops_self_and_zero_rows() {
        let rows = vec![
            rating(1, 1, 10, 10, true),  // self
            rating(1, 2, 0, 0, false),   // zero local
            rating(1, 2, 8, 8, true),
        ];
        let edges = collapse_edges(&rows);
        assert_eq!(edges.len(), 1);
        let stats = &edges[&(1, 2)];
        assert_eq!(stats.count, 1, "only the nonzero non-self row survives");
    }

    #[test]
    fn test_collapse_averages_repeat_ratings() {
        let rows = vec![rating(1, 2, 10, 10, true), rating(1, 2, 4, 4, false)];
        let edges = collapse_edges(&rows);
        let stats = &edges[&(1, 2)];
        assert_eq!(stats.count, 2);
        let expected = (1.0 + (0.4 + 0.4 + 0.0) / 3.0) / 2.0;
        assert!((stats.weight() - expected).abs() < 1e-12);
        assert_eq!(stats.contribution_avg(), Some(7.0));
        assert_eq!(stats.would_work_again_ratio(), 0.5);
    }

    #[test]
    fn test_collapse_spans_teams() {
        let mut row_b = rating(1, 2, 6, 6, true);
        row_b.team_id = Some(2);
        let rows = vec![rating(1, 2, 10, 10, true), row_b];
        let edges = collapse_edges(&rows);
        assert_eq!(edges.len(), 1, "same pair across teams collapses to one edge");
        assert_eq!(edges[&(1, 2)].count, 2);
    }

    #[test]
    fn test_missing_endpoint_rows_skipped() {
        let mut row = rating(1, 2, 9, 9, true);
        row.rater_id = None;
        assert!(collapse_edges(&[row]).is_empty());
    }

    #[test]
    fn test_empty_user_set() {
        let scores = trust_of(&[], &[]);
        assert!(scores.is_empty());
    }

    #[test]
    fn test_empty_graph_is_uniform() {
        // 3 users, 0 ratings
        let scores = trust_of(&[], &[1, 2, 3]);
        assert_sums_to_one(&scores);
        for id in [1, 2, 3] {
            assert!((scores[&id] - 1.0 / 3.0).abs() <= 1e-9, "uniform 1/3 expected");
        }
    }

    #[test]
    fn test_star_target_outranks_raters() {
        // A→B and C→B, both maximal
        let rows = vec![rating(1, 2, 10, 10, true), rating(3, 2, 10, 10, true)];
        let scores = trust_of(&rows, &[1, 2, 3]);
        assert_sums_to_one(&scores);
        assert!(scores[&2] > scores[&1], "target must outrank raters");
        assert!((scores[&1] - scores[&3]).abs() <= 1e-9, "symmetric raters tie");
    }

    #[test]
    fn test_duplicate_row_does_not_move_trust() {
        let base = vec![rating(1, 2, 10, 10, true), rating(3, 2, 10, 10, true)];
        let mut with_dup = base.clone();
        with_dup.push(rating(1, 2, 10, 10, true));

        let before = trust_of(&base, &[1, 2, 3]);
        let after = trust_of(&with_dup, &[1, 2, 3]);
        for id in [1, 2, 3] {
            assert!(
                (before[&id] - after[&id]).abs() <= 1e-9,
                "exact duplicate must not move trust for {}",
                id
            );
        }
    }

    #[test]
    fn test_self_rating_does_not_move_trust() {
        let base = vec![rating(1, 2, 10, 10, true), rating(3, 2, 10, 10, true)];
        let mut with_self = base.clone();
        with_self.push(rating(2, 2, 10, 10, true));

        let before = trust_of(&base, &[1, 2, 3]);
        let after = trust_of(&with_self, &[1, 2, 3]);
        for id in [1, 2, 3] {
            assert!((before[&id] - after[&id]).abs() <= 1e-12);
        }
    }

    #[test]
    fn test_zero_weight_row_does_not_move_trust() {
        let base = vec![rating(1, 2, 10, 10, true)];
        let mut with_zero = base.clone();
        with_zero.push(rating(3, 2, 0, 0, false));

        let before = trust_of(&base, &[1, 2, 3]);
        let after = trust_of(&with_zero, &[1, 2, 3]);
        for id in [1, 2, 3] {
            assert!((before[&id] - after[&id]).abs() <= 1e-12);
        }
    }

    #[test]
    fn test_permutation_immunity() {
        let rows = vec![
            rating(1, 2, 9, 7, true),
            rating(2, 3, 5, 5, false),
            rating(3, 1, 8, 2, true),
            rating(1, 3, 4, 6, true),
        ];
        let mut reversed = rows.clone();
        reversed.reverse();

        let a = trust_of(&rows, &[1, 2, 3]);
        let b = trust_of(&reversed, &[1, 2, 3]);
        for id in [1, 2, 3] {
            assert!((a[&id] - b[&id]).abs() <= 1e-12, "row order must not matter");
        }
    }

    #[test]
    fn test_cycle_is_symmetric() {
        let rows = vec![
            rating(1, 2, 8, 6, true),
            rating(2, 3, 8, 6, true),
            rating(3, 1, 8, 6, true),
        ];
        let scores = trust_of(&rows, &[1, 2, 3]);
        assert_sums_to_one(&scores);
        assert!((scores[&1] - scores[&2]).abs() <= 1e-9);
        assert!((scores[&2] - scores[&3]).abs() <= 1e-9);
    }

    #[test]
    fn test_dangling_sink_keeps_mass() {
        // A→B, B has no outgoing edges
        let rows = vec![rating(1, 2, 10, 10, true)];
        let scores = trust_of(&rows, &[1, 2]);
        assert_sums_to_one(&scores);
        assert!(scores[&2] > scores[&1], "sink must outrank its rater");
    }

    #[test]
    fn test_edges_to_unknown_users_ignored() {
        // Target 99 is not in the user set; its edge carries no mass
        let rows = vec![rating(1, 99, 10, 10, true)];
        let scores = trust_of(&rows, &[1, 2]);
        assert_sums_to_one(&scores);
        assert!((scores[&1] - scores[&2]).abs() <= 1e-9);
    }

    #[test]
    fn test_max_iter_reports_nonconvergence() {
        let rows = vec![rating(1, 2, 10, 10, true), rating(2, 1, 10, 10, true)];
        let edges = collapse_edges(&rows);
        let params = TrustParams { damping: 0.85, max_iter: 2, tolerance: 0.0 };
        let run = compute_trust(&[1, 2], &edges, &params, None);
        assert!(!run.converged);
        assert_eq!(run.iterations, 2);
        assert_sums_to_one(&run.scores);
    }

    #[test]
    fn test_cancel_flag_stops_iteration() {
        let rows = vec![rating(1, 2, 10, 10, true)];
        let edges = collapse_edges(&rows);
        let cancel = AtomicBool::new(true);
        let run = compute_trust(&[1, 2], &edges, &TrustParams::default(), Some(&cancel));
        assert_eq!(run.iterations, 0, "pre-set cancel flag stops before the first pass");
        assert_sums_to_one(&run.scores);
    }
}
