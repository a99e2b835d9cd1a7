//! Read-only projection of the persistence layer.
//!
//! The relational store itself (writes, state machines, auth) lives in a
//! separate service; this side consumes a JSON dump of its tables and swaps
//! the whole snapshot atomically on reload. Scores are always recomputed
//! from the current snapshot, never carried across a swap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer};
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Lobby {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub contest_link: Option<String>,
    #[serde(default)]
    pub leader_id: Option<i64>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Team {
    pub id: i64,
    pub lobby_id: i64,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamMember {
    pub team_id: i64,
    pub user_id: i64,
}

/// One rater's opinion of one target teammate, per team.
///
/// Axis fields in dumps may be a number, a numeric string (HTTP form
/// residue), or null; anything else fails the load with an invalid-rating
/// message. Out-of-range values are kept here and clamped at normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct Rating {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub team_id: Option<i64>,
    #[serde(default)]
    pub rater_id: Option<i64>,
    #[serde(default)]
    pub target_user_id: Option<i64>,
    #[serde(default, deserialize_with = "de_score_axis")]
    pub contribution: Option<i64>,
    #[serde(default, deserialize_with = "de_score_axis")]
    pub communication: Option<i64>,
    #[serde(default)]
    pub would_work_again: bool,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRequest {
    pub id: i64,
    pub lobby_id: i64,
    pub requester_id: i64,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invitation {
    pub id: i64,
    pub team_id: i64,
    #[serde(default)]
    pub target_user_id: Option<i64>,
    pub status: String,
}

/// Accept number, numeric string, or null for a 0-10 rating axis
fn de_score_axis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Some(f.round() as i64))
            } else {
                Err(serde::de::Error::custom(format!(
                    "invalid rating: axis value {} out of integer range",
                    n
                )))
            }
        }
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<i64>()
                .or_else(|_| trimmed.parse::<f64>().map(|f| f.round() as i64))
                .map(Some)
                .map_err(|_| {
                    serde::de::Error::custom(format!(
                        "invalid rating: non-numeric axis value {:?}",
                        s
                    ))
                })
        }
        Some(other) => Err(serde::de::Error::custom(format!(
            "invalid rating: unexpected axis value {}",
            other
        ))),
    }
}

/// One immutable dump of the collaborator's tables.
///
/// Unknown keys (extra columns, tables the engine never reads) are ignored
/// so a full database export loads as-is.
#[derive(Debug, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub lobbies: Vec<Lobby>,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub team_members: Vec<TeamMember>,
    #[serde(default)]
    pub ratings: Vec<Rating>,
    #[serde(default)]
    pub join_requests: Vec<JoinRequest>,
    #[serde(default)]
    pub invitations: Vec<Invitation>,
}

impl Snapshot {
    pub fn user(&self, id: i64) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn lobby(&self, id: i64) -> Option<&Lobby> {
        self.lobbies.iter().find(|l| l.id == id)
    }

    pub fn team(&self, id: i64) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == id)
    }

    /// A lobby has exactly one team in this design; take the first if a
    /// dump carries strays.
    pub fn team_for_lobby(&self, lobby_id: i64) -> Option<&Team> {
        self.teams.iter().find(|t| t.lobby_id == lobby_id)
    }

    pub fn members_of(&self, team_id: i64) -> Vec<i64> {
        self.team_members
            .iter()
            .filter(|m| m.team_id == team_id)
            .map(|m| m.user_id)
            .collect()
    }

    /// Lobbies in the baseline order: newest first, id as tiebreaker
    pub fn lobbies_newest_first(&self) -> Vec<&Lobby> {
        let mut lobbies: Vec<&Lobby> = self.lobbies.iter().collect();
        lobbies.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        lobbies
    }

    /// Status of the viewer's pending join request for a lobby, if any
    pub fn pending_join_request_status(&self, user_id: i64, lobby_id: i64) -> Option<String> {
        self.join_requests
            .iter()
            .find(|r| r.requester_id == user_id && r.lobby_id == lobby_id && r.status == "pending")
            .map(|r| r.status.clone())
    }

    /// Users with a pending invitation from this team
    pub fn pending_invite_targets(&self, team_id: i64) -> Vec<i64> {
        self.invitations
            .iter()
            .filter(|inv| inv.team_id == team_id && inv.status == "pending")
            .filter_map(|inv| inv.target_user_id)
            .collect()
    }

    /// Log anomaly counts without dropping rows; the engine guards against
    /// these anyway, the counts are for operators eyeballing a bad dump.
    fn audit(&self) {
        let self_ratings = self
            .ratings
            .iter()
            .filter(|r| r.rater_id.is_some() && r.rater_id == r.target_user_id)
            .count();
        if self_ratings > 0 {
            warn!("Snapshot contains {} self-rating rows (ignored by the engine)", self_ratings);
        }

        let dangling = self
            .ratings
            .iter()
            .filter(|r| {
                let rater_known = r.rater_id.map(|id| self.user(id).is_some()).unwrap_or(false);
                let target_known = r
                    .target_user_id
                    .map(|id| self.user(id).is_some())
                    .unwrap_or(false);
                !rater_known || !target_known
            })
            .count();
        if dangling > 0 {
            warn!("Snapshot contains {} rating rows with a missing or unknown endpoint", dangling);
        }
    }
}

/// Snapshot holder: whole-snapshot swap on reload, generation counter so
/// stats can tell dumps apart.
pub struct Store {
    path: String,
    snapshot: RwLock<Arc<Snapshot>>,
    generation: AtomicU64,
}

impl Store {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let snapshot = Self::read_snapshot(path)?;
        snapshot.audit();
        info!(
            "Store loaded from {}: {} users, {} lobbies, {} ratings",
            path,
            snapshot.users.len(),
            snapshot.lobbies.len(),
            snapshot.ratings.len()
        );
        Ok(Self {
            path: path.to_string(),
            snapshot: RwLock::new(Arc::new(snapshot)),
            generation: AtomicU64::new(1),
        })
    }

    /// Re-read the snapshot file and swap it in. On failure the previous
    /// snapshot stays live.
    pub fn reload(&self) -> anyhow::Result<()> {
        let snapshot = Self::read_snapshot(&self.path)?;
        snapshot.audit();
        *self.snapshot.write() = Arc::new(snapshot);
        self.generation.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read_snapshot(path: &str) -> anyhow::Result<Snapshot> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read snapshot '{}': {}", path, e))?;
        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse snapshot '{}': {}", path, e))?;
        Ok(snapshot)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn get_stats(&self) -> serde_json::Value {
        let snapshot = self.snapshot();
        serde_json::json!({
            "path": self.path,
            "generation": self.generation(),
            "users": snapshot.users.len(),
            "lobbies": snapshot.lobbies.len(),
            "teams": snapshot.teams.len(),
            "team_members": snapshot.team_members.len(),
            "ratings": snapshot.ratings.len(),
            "join_requests": snapshot.join_requests.len(),
            "invitations": snapshot.invitations.len(),
        })
    }
}
