//! Trust-weighted reputation aggregation.
//!
//! Each rater contributes once per target no matter how many rows they
//! wrote: rows are first summarized per rater, then the per-rater means
//! are combined with global-trust weights. `rating_count` stays the raw
//! pre-collapse row count on purpose.

use std::collections::HashMap;

use serde::Serialize;

use crate::store::Rating;

/// Aggregated reputation for one target user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reputation {
    pub contribution_avg: f64,
    pub communication_avg: f64,
    pub would_work_again_ratio: Option<f64>,
    pub rating_count: u32,
}

impl Reputation {
    /// What a user with no received ratings looks like
    pub fn empty() -> Self {
        Self {
            contribution_avg: 0.0,
            communication_avg: 0.0,
            would_work_again_ratio: None,
            rating_count: 0,
        }
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

#[derive(Default)]
struct RaterSummary {
    contrib_sum: f64,
    contrib_n: u32,
    comm_sum: f64,
    comm_n: u32,
    wwa_true: u32,
    rows: u32,
}

/// Aggregate a target's incoming rating rows into a `Reputation` using
/// rater trust weights.
///
/// Null axis components are skipped per rater; raters with zero or missing
/// trust weight contribute nothing to the weighted means. An empty weight
/// denominator yields 0 for the two averages and null for the ratio.
pub fn reputation_for(target_id: i64, rows: &[Rating], trust: &HashMap<i64, f64>) -> Reputation {
    let mut by_rater: HashMap<i64, RaterSummary> = HashMap::new();
    let mut rating_count = 0u32;

    for row in rows {
        let (Some(rater), Some(target)) = (row.rater_id, row.target_user_id) else {
            continue;
        };
        if target != target_id || rater == target_id {
            continue;
        }
        rating_count += 1;

        let summary = by_rater.entry(rater).or_default();
        if let Some(c) = row.contribution {
            summary.contrib_sum += c.clamp(0, 10) as f64;
            summary.contrib_n += 1;
        }
        if let Some(k) = row.communication {
            summary.comm_sum += k.clamp(0, 10) as f64;
            summary.comm_n += 1;
        }
        if row.would_work_again {
            summary.wwa_true += 1;
        }
        summary.rows += 1;
    }

    if rating_count == 0 {
        return Reputation::empty();
    }

    let mut contrib_weight = 0.0;
    let mut contrib_acc = 0.0;
    let mut comm_weight = 0.0;
    let mut comm_acc = 0.0;
    let mut wwa_weight = 0.0;
    let mut wwa_acc = 0.0;

    for (rater, summary) in &by_rater {
        let w = trust.get(rater).copied().unwrap_or(0.0);
        if w <= 0.0 {
            continue;
        }
        if summary.contrib_n > 0 {
            contrib_weight += w;
            contrib_acc += w * (summary.contrib_sum / summary.contrib_n as f64);
        }
        if summary.comm_n > 0 {
            comm_weight += w;
            comm_acc += w * (summary.comm_sum / summary.comm_n as f64);
        }
        wwa_weight += w;
        wwa_acc += w * (summary.wwa_true as f64 / summary.rows as f64);
    }

    Reputation {
        contribution_avg: round2(if contrib_weight > 0.0 { contrib_acc / contrib_weight } else { 0.0 }),
        communication_avg: round2(if comm_weight > 0.0 { comm_acc / comm_weight } else { 0.0 }),
        would_work_again_ratio: (wwa_weight > 0.0).then(|| wwa_acc / wwa_weight),
        rating_count,
    }
}

/// Pre-scaling overall fraction in [0, 1]; this is what the graph export
/// emits as `reputation_overall`
pub fn overall_fraction(rep: &Reputation) -> f64 {
    let contrib = clamp01(rep.contribution_avg / 10.0);
    let comm = clamp01(rep.communication_avg / 10.0);
    let wwa = clamp01(rep.would_work_again_ratio.unwrap_or(0.0));
    (contrib + comm + wwa) / 3.0
}

/// Scalar 0..10 overall score used by the matcher
pub fn overall_score(rep: &Reputation) -> f64 {
    round2(10.0 * overall_fraction(rep))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rating(rater: i64, target: i64, contribution: Option<i64>, communication: Option<i64>, wwa: bool) -> Rating {
        Rating {
            id: None,
            team_id: Some(1),
            rater_id: Some(rater),
            target_user_id: Some(target),
            contribution,
            communication,
            would_work_again: wwa,
            comment: None,
            created_at: None,
        }
    }

    fn uniform_trust(ids: &[i64]) -> HashMap<i64, f64> {
        ids.iter().map(|&id| (id, 1.0 / ids.len() as f64)).collect()
    }

    #[test]
    fn test_unrated_user_is_empty() {
        let rep = reputation_for(1, &[], &uniform_trust(&[1, 2]));
        assert_eq!(rep, Reputation::empty());
        assert_eq!(rep.would_work_again_ratio, None);
    }

    #[test]
    fn test_star_reputation() {
        // A→B and C→B, both 10/10/true
        let rows = vec![
            rating(1, 2, Some(10), Some(10), true),
            rating(3, 2, Some(10), Some(10), true),
        ];
        let rep = reputation_for(2, &rows, &uniform_trust(&[1, 2, 3]));
        assert_eq!(rep.contribution_avg, 10.0);
        assert_eq!(rep.communication_avg, 10.0);
        assert_eq!(rep.would_work_again_ratio, Some(1.0));
        assert_eq!(rep.rating_count, 2);
        assert_eq!(overall_score(&rep), 10.0);
    }

    #[test]
    fn test_duplicate_row_only_bumps_count() {
        let base = vec![
            rating(1, 2, Some(10), Some(10), true),
            rating(3, 2, Some(10), Some(10), true),
        ];
        let mut with_dup = base.clone();
        with_dup.push(rating(1, 2, Some(10), Some(10), true));

        let trust = uniform_trust(&[1, 2, 3]);
        let before = reputation_for(2, &base, &trust);
        let after = reputation_for(2, &with_dup, &trust);

        assert_eq!(before.contribution_avg, after.contribution_avg);
        assert_eq!(before.communication_avg, after.communication_avg);
        assert_eq!(before.would_work_again_ratio, after.would_work_again_ratio);
        assert_eq!(after.rating_count, 3, "count is raw and pre-collapse");
    }

    #[test]
    fn test_repeat_rater_contributes_once() {
        // Rater 1 spams target 2 with tens; rater 3 rates once with zero.
        // With equal trust the result is the mean of the two rater means,
        // not dominated by the spammer's row count.
        let rows = vec![
            rating(1, 2, Some(10), Some(10), true),
            rating(1, 2, Some(10), Some(10), true),
            rating(1, 2, Some(10), Some(10), true),
            rating(3, 2, Some(0), Some(0), false),
        ];
        let rep = reputation_for(2, &rows, &uniform_trust(&[1, 2, 3]));
        assert_eq!(rep.contribution_avg, 5.0);
        assert_eq!(rep.communication_avg, 5.0);
        assert_eq!(rep.would_work_again_ratio, Some(0.5));
        assert_eq!(rep.rating_count, 4);
    }

    #[test]
    fn test_trust_weighting_skews_average() {
        let rows = vec![
            rating(1, 3, Some(10), Some(10), true),
            rating(2, 3, Some(0), Some(0), false),
        ];
        let trust: HashMap<i64, f64> = [(1, 0.75), (2, 0.25), (3, 0.0)].into_iter().collect();
        let rep = reputation_for(3, &rows, &trust);
        assert_eq!(rep.contribution_avg, 7.5);
        assert_eq!(rep.would_work_again_ratio, Some(0.75));
    }

    #[test]
    fn test_null_axes_skipped_per_rater() {
        let rows = vec![
            rating(1, 2, Some(8), None, true),
            rating(3, 2, None, Some(6), false),
        ];
        let rep = reputation_for(2, &rows, &uniform_trust(&[1, 2, 3]));
        // Only rater 1 has a contribution mean, only rater 3 a communication mean
        assert_eq!(rep.contribution_avg, 8.0);
        assert_eq!(rep.communication_avg, 6.0);
        assert_eq!(rep.would_work_again_ratio, Some(0.5));
    }

    #[test]
    fn test_zero_trust_raters_yield_defaults() {
        let rows = vec![rating(1, 2, Some(9), Some(9), true)];
        let trust: HashMap<i64, f64> = [(2, 1.0)].into_iter().collect();
        let rep = reputation_for(2, &rows, &trust);
        assert_eq!(rep.contribution_avg, 0.0);
        assert_eq!(rep.communication_avg, 0.0);
        assert_eq!(rep.would_work_again_ratio, None, "no weighted raters, ratio is null");
        assert_eq!(rep.rating_count, 1, "count still reflects the raw rows");
    }

    #[test]
    fn test_self_rows_never_counted() {
        let rows = vec![rating(2, 2, Some(10), Some(10), true)];
        let rep = reputation_for(2, &rows, &uniform_trust(&[1, 2]));
        assert_eq!(rep, Reputation::empty());
    }

    #[test]
    fn test_averages_rounded_to_two_decimals() {
        let rows = vec![
            rating(1, 4, Some(10), Some(10), true),
            rating(2, 4, Some(9), Some(9), true),
            rating(3, 4, Some(9), Some(9), false),
        ];
        let rep = reputation_for(4, &rows, &uniform_trust(&[1, 2, 3, 4]));
        assert_eq!(rep.contribution_avg, 9.33);
        assert_eq!(rep.communication_avg, 9.33);
    }

    #[test]
    fn test_overall_score_range_and_rounding() {
        let rep = Reputation {
            contribution_avg: 8.0,
            communication_avg: 6.0,
            would_work_again_ratio: Some(1.0),
            rating_count: 1,
        };
        assert_eq!(overall_score(&rep), 8.0);

        let empty = Reputation::empty();
        assert_eq!(overall_score(&empty), 0.0, "missing ratio counts as 0");

        let maxed = Reputation {
            contribution_avg: 10.0,
            communication_avg: 10.0,
            would_work_again_ratio: Some(1.0),
            rating_count: 2,
        };
        assert_eq!(overall_score(&maxed), 10.0);
    }

    #[test]
    fn test_overall_fraction_is_prescaling() {
        let rep = Reputation {
            contribution_avg: 10.0,
            communication_avg: 10.0,
            would_work_again_ratio: Some(1.0),
            rating_count: 2,
        };
        assert!((overall_fraction(&rep) - 1.0).abs() < 1e-12);
    }
}
