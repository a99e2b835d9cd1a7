//! Reputation-driven matching: lobby ordering for a viewer and invite
//! suggestions for a leader.
//!
//! Both rankings key on the distance between overall scores, so "people
//! like me" sort first; joinability trumps distance for the lobby list.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::rep::reputation::round2;
use crate::store::Snapshot;

/// One lobby in viewer-ranked order, with matching annotations
#[derive(Debug, Clone, Serialize)]
pub struct RankedLobby {
    pub id: i64,
    pub title: String,
    pub contest_link: Option<String>,
    pub leader_id: Option<i64>,
    pub finished: bool,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub participant_count: usize,
    pub team_locked: bool,
    /// "Leader" / "Member" / null from the viewer's perspective
    pub role: Option<&'static str>,
    /// Status of the viewer's pending join request, if any
    pub join_request_status: Option<String>,
    pub team_reputation: f64,
    pub rep_distance: Option<f64>,
    #[serde(skip)]
    baseline: usize,
}

impl RankedLobby {
    fn joinable(&self) -> bool {
        self.role.is_none() && !self.finished && !self.team_locked
    }
}

/// Mean overall score across team members, 0 for an empty team
pub fn team_reputation(member_ids: &[i64], overall_by_id: &HashMap<i64, f64>) -> f64 {
    if member_ids.is_empty() {
        return 0.0;
    }
    let sum: f64 = member_ids
        .iter()
        .map(|id| overall_by_id.get(id).copied().unwrap_or(0.0))
        .sum();
    round2(sum / member_ids.len() as f64)
}

/// Order lobbies for a viewer: joinable ones first, then by closeness of
/// team reputation to the viewer's own, ties broken by the newest-first
/// baseline order. Without a viewer the baseline order is returned with
/// bare annotations.
pub fn rank_lobbies(
    snapshot: &Snapshot,
    viewer_id: Option<i64>,
    overall_by_id: &HashMap<i64, f64>,
) -> Vec<RankedLobby> {
    let viewer_rep = viewer_id.map(|id| overall_by_id.get(&id).copied().unwrap_or(0.0));

    let mut out: Vec<RankedLobby> = Vec::new();
    for (baseline, lobby) in snapshot.lobbies_newest_first().into_iter().enumerate() {
        let team = snapshot.team_for_lobby(lobby.id);
        let member_ids = team.map(|t| snapshot.members_of(t.id)).unwrap_or_default();
        let team_locked = team.map(|t| t.locked).unwrap_or(false);

        let role = match viewer_id {
            Some(v) if lobby.leader_id == Some(v) => Some("Leader"),
            Some(v) if member_ids.contains(&v) => Some("Member"),
            _ => None,
        };

        let team_rep = team_reputation(&member_ids, overall_by_id);
        out.push(RankedLobby {
            id: lobby.id,
            title: lobby.title.clone(),
            contest_link: lobby.contest_link.clone(),
            leader_id: lobby.leader_id,
            finished: lobby.finished,
            finished_at: lobby.finished_at,
            participant_count: member_ids.len(),
            team_locked,
            role,
            join_request_status: viewer_id
                .and_then(|v| snapshot.pending_join_request_status(v, lobby.id)),
            team_reputation: team_rep,
            rep_distance: viewer_rep.map(|vr| round2((team_rep - vr).abs())),
            baseline,
        });
    }

    if viewer_id.is_some() {
        out.sort_by(|a, b| {
            let bucket_a = if a.joinable() { 0u8 } else { 1 };
            let bucket_b = if b.joinable() { 0u8 } else { 1 };
            bucket_a
                .cmp(&bucket_b)
                .then_with(|| {
                    let dist_a = a.rep_distance.unwrap_or(f64::MAX);
                    let dist_b = b.rep_distance.unwrap_or(f64::MAX);
                    dist_a.total_cmp(&dist_b)
                })
                .then_with(|| a.baseline.cmp(&b.baseline))
        });
    }

    out
}

/// One suggested invitee, closest reputation first
#[derive(Debug, Clone, Serialize)]
pub struct InviteCandidate {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    /// Overall score, 0..10
    pub reputation: f64,
    pub distance: f64,
}

/// Suggest up to `limit` users whose overall score is closest to the
/// leader's, excluding current members, the leader, and anyone with a
/// pending invitation from this team. A finished contest or a locked team
/// yields no suggestions.
pub fn invite_candidates(
    snapshot: &Snapshot,
    leader_id: i64,
    team_id: i64,
    overall_by_id: &HashMap<i64, f64>,
    limit: usize,
) -> Vec<InviteCandidate> {
    let Some(team) = snapshot.team(team_id) else {
        return Vec::new();
    };
    let finished = snapshot.lobby(team.lobby_id).map(|l| l.finished).unwrap_or(false);
    if finished || team.locked {
        return Vec::new();
    }

    let mut excluded: HashSet<i64> = snapshot.members_of(team_id).into_iter().collect();
    excluded.insert(leader_id);
    excluded.extend(snapshot.pending_invite_targets(team_id));

    let leader_rep = overall_by_id.get(&leader_id).copied().unwrap_or(0.0);

    let mut scored: Vec<InviteCandidate> = snapshot
        .users
        .iter()
        .filter(|u| !excluded.contains(&u.id))
        .map(|u| {
            let score = overall_by_id.get(&u.id).copied().unwrap_or(0.0);
            InviteCandidate {
                id: u.id,
                name: u.name.clone(),
                email: u.email.clone(),
                reputation: score,
                distance: round2((score - leader_rep).abs()),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    scored.truncate(limit);
    scored
}
