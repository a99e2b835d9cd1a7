//! Request-scoped reputation engine.
//!
//! Every public operation takes one snapshot from the store, computes the
//! trust vector once, and derives everything else from that pair, so a
//! single response is internally consistent even while the snapshot is
//! being swapped underneath.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::error::EngineError;
use crate::metrics::MetricsCounters;
use crate::rep::matching::{self, InviteCandidate, RankedLobby};
use crate::rep::reputation::{overall_fraction, overall_score, reputation_for, Reputation};
use crate::rep::trust::{collapse_edges, compute_trust, EdgeStats, TrustParams};
use crate::store::{Snapshot, Store};

pub struct RepEngine {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub metrics: Arc<MetricsCounters>,
}

/// One snapshot + one trust vector; never outlives the request
struct RequestView {
    snapshot: Arc<Snapshot>,
    edges: std::collections::BTreeMap<(i64, i64), EdgeStats>,
    trust: HashMap<i64, f64>,
}

impl RequestView {
    fn reputation(&self, user_id: i64) -> Result<Reputation, EngineError> {
        if self.snapshot.user(user_id).is_none() {
            return Err(EngineError::UserNotFound(user_id));
        }
        Ok(reputation_for(user_id, &self.snapshot.ratings, &self.trust))
    }

    /// Overall 0..10 score per known user
    fn overall_by_id(&self) -> HashMap<i64, f64> {
        self.snapshot
            .users
            .iter()
            .map(|u| {
                let rep = reputation_for(u.id, &self.snapshot.ratings, &self.trust);
                (u.id, overall_score(&rep))
            })
            .collect()
    }
}

/// Node payload for the graph export
#[derive(Debug, Serialize)]
pub struct GraphNode {
    pub id: i64,
    pub name: String,
    pub trust: f64,
    pub reputation: Option<Reputation>,
    /// Pre-scaling overall in [0, 1]
    pub reputation_overall: f64,
}

/// Collapsed edge payload for the graph export
#[derive(Debug, Serialize)]
pub struct GraphEdge {
    pub source: i64,
    pub target: i64,
    /// Mean local trust for the pair, in (0, 1]
    pub weight: f64,
    /// Pre-collapse row count for the pair
    pub count: u32,
    pub contribution_avg: Option<f64>,
    pub communication_avg: Option<f64>,
    pub would_work_again_ratio: f64,
}

#[derive(Debug, Serialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl RepEngine {
    pub fn new(config: Arc<Config>, store: Arc<Store>, metrics: Arc<MetricsCounters>) -> Self {
        Self { config, store, metrics }
    }

    fn trust_params(&self) -> TrustParams {
        TrustParams {
            damping: self.config.trust.damping,
            max_iter: self.config.trust.max_iter,
            tolerance: self.config.trust.tolerance,
        }
    }

    fn view(&self) -> RequestView {
        let snapshot = self.store.snapshot();
        let user_ids: Vec<i64> = snapshot.users.iter().map(|u| u.id).collect();
        let edges = collapse_edges(&snapshot.ratings);
        let run = compute_trust(&user_ids, &edges, &self.trust_params(), None);

        self.metrics.trust_computations.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .trust_iterations_last
            .store(run.iterations as u64, Ordering::Relaxed);
        if !run.converged {
            self.metrics.convergence_warnings.fetch_add(1, Ordering::Relaxed);
        }

        RequestView { snapshot, edges, trust: run.scores }
    }

    /// Global trust vector for the current snapshot
    pub fn trust_scores(&self) -> HashMap<i64, f64> {
        self.view().trust
    }

    /// Trust-weighted reputation for one user
    pub fn reputation(&self, user_id: i64) -> Result<Reputation, EngineError> {
        self.view().reputation(user_id)
    }

    /// Scalar 0..10 overall score for one user
    pub fn overall(&self, user_id: i64) -> Result<f64, EngineError> {
        Ok(overall_score(&self.reputation(user_id)?))
    }

    /// Viewer-ranked lobby list with annotations
    pub fn rank_lobbies(&self, viewer_id: Option<i64>) -> Result<Vec<RankedLobby>, EngineError> {
        let view = self.view();
        if let Some(v) = viewer_id {
            if view.snapshot.user(v).is_none() {
                return Err(EngineError::UserNotFound(v));
            }
        }
        let scores = view.overall_by_id();
        Ok(matching::rank_lobbies(&view.snapshot, viewer_id, &scores))
    }

    /// Invite suggestions for a leader's team
    pub fn invite_candidates(
        &self,
        leader_id: i64,
        team_id: i64,
    ) -> Result<Vec<InviteCandidate>, EngineError> {
        let view = self.view();
        if view.snapshot.user(leader_id).is_none() {
            return Err(EngineError::UserNotFound(leader_id));
        }
        if view.snapshot.team(team_id).is_none() {
            return Err(EngineError::TeamNotFound(team_id));
        }
        let scores = view.overall_by_id();
        Ok(matching::invite_candidates(
            &view.snapshot,
            leader_id,
            team_id,
            &scores,
            self.config.matching.invite_limit,
        ))
    }

    /// All users with trust, reputation and overall score
    pub fn user_summaries(&self) -> Vec<serde_json::Value> {
        let view = self.view();
        let mut users: Vec<&crate::store::User> = view.snapshot.users.iter().collect();
        users.sort_by_key(|u| u.id);
        users
            .into_iter()
            .map(|u| {
                let rep = reputation_for(u.id, &view.snapshot.ratings, &view.trust);
                serde_json::json!({
                    "id": u.id,
                    "name": u.name,
                    "email": u.email,
                    "trust": view.trust.get(&u.id).copied().unwrap_or(0.0),
                    "overall": overall_score(&rep),
                    "reputation": rep,
                })
            })
            .collect()
    }

    /// Deduped rating graph for visualization: users with global trust,
    /// collapsed rater→target edges with averaged weights
    pub fn graph(&self) -> GraphView {
        let view = self.view();

        let mut users: Vec<&crate::store::User> = view.snapshot.users.iter().collect();
        users.sort_by_key(|u| u.id);

        let nodes = users
            .into_iter()
            .map(|u| {
                let rep = reputation_for(u.id, &view.snapshot.ratings, &view.trust);
                let reputation_overall = overall_fraction(&rep);
                GraphNode {
                    id: u.id,
                    name: u.name.clone(),
                    trust: view.trust.get(&u.id).copied().unwrap_or(0.0),
                    reputation: Some(rep),
                    reputation_overall,
                }
            })
            .collect();

        let edges = view
            .edges
            .iter()
            .map(|(&(source, target), stats)| GraphEdge {
                source,
                target,
                weight: stats.weight(),
                count: stats.count,
                contribution_avg: stats.contribution_avg(),
                communication_avg: stats.communication_avg(),
                would_work_again_ratio: stats.would_work_again_ratio(),
            })
            .collect();

        GraphView { nodes, edges }
    }

    /// Engine stats for the Web UI
    pub fn get_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "store": self.store.get_stats(),
            "trust": {
                "damping": self.config.trust.damping,
                "max_iter": self.config.trust.max_iter,
                "tolerance": self.config.trust.tolerance,
                "computations": self.metrics.trust_computations.load(Ordering::Relaxed),
                "last_iterations": self.metrics.trust_iterations_last.load(Ordering::Relaxed),
                "convergence_warnings": self.metrics.convergence_warnings.load(Ordering::Relaxed),
            },
        })
    }
}
