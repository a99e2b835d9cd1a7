use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::info;

use crate::config::Config;
use crate::error::EngineError;
use crate::metrics::render_metrics;
use crate::rep::engine::RepEngine;

/// JSON API server for the reputation engine
pub struct WebServer {
    engine: Arc<RepEngine>,
    config: Arc<Config>,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<RepEngine>,
}

#[derive(Deserialize)]
struct ViewerQuery {
    viewer_id: Option<i64>,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

impl WebServer {
    pub fn new(engine: Arc<RepEngine>, config: Arc<Config>) -> Self {
        Self { engine, config }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let state = AppState { engine: self.engine.clone() };

        let app = Router::new()
            .route("/graph", get(api_graph))
            .route("/api/graph", get(api_graph))
            .route("/api/trust", get(api_trust))
            .route("/api/users", get(api_users))
            .route("/api/users/:user_id/reputation", get(api_user_reputation))
            .route("/api/users/:user_id/overall", get(api_user_overall))
            .route("/api/lobbies", get(api_lobbies))
            .route("/api/lobbies/:lobby_id/invite-suggestions", get(api_invite_suggestions))
            .route("/api/stats", get(api_stats))
            .route("/metrics", get(api_metrics))
            .with_state(state);

        let addr = format!("{}:{}", self.config.web.address, self.config.web.port);
        info!("🌐 API listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn map_engine_error(state: &AppState, e: EngineError) -> ApiError {
    match e {
        EngineError::UserNotFound(_)
        | EngineError::LobbyNotFound(_)
        | EngineError::TeamNotFound(_) => {
            state.engine.metrics.not_found_total.fetch_add(1, Ordering::Relaxed);
            (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "not_found"})))
        }
    }
}

/// Deduped rating graph for visualization: nodes carry global trust and
/// reputation, edges the averaged local weights
async fn api_graph(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.engine.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    state.engine.metrics.graph_requests.fetch_add(1, Ordering::Relaxed);
    Json(serde_json::to_value(state.engine.graph()).unwrap_or_default())
}

/// Global trust vector: user id → weight
async fn api_trust(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.engine.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    state.engine.metrics.trust_requests.fetch_add(1, Ordering::Relaxed);
    let trust = state.engine.trust_scores();
    let map: serde_json::Map<String, serde_json::Value> = trust
        .into_iter()
        .map(|(id, v)| (id.to_string(), serde_json::json!(v)))
        .collect();
    Json(serde_json::Value::Object(map))
}

/// All users with trust, reputation and overall score
async fn api_users(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.engine.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    Json(serde_json::json!(state.engine.user_summaries()))
}

async fn api_user_reputation(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    state.engine.metrics.reputation_requests.fetch_add(1, Ordering::Relaxed);
    let rep = state
        .engine
        .reputation(user_id)
        .map_err(|e| map_engine_error(&state, e))?;
    Ok(Json(serde_json::to_value(rep).unwrap_or_default()))
}

async fn api_user_overall(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    state.engine.metrics.reputation_requests.fetch_add(1, Ordering::Relaxed);
    let overall = state
        .engine
        .overall(user_id)
        .map_err(|e| map_engine_error(&state, e))?;
    Ok(Json(serde_json::json!({"user_id": user_id, "overall": overall})))
}

/// Lobby list ranked for the viewer: joinable first, closest team
/// reputation next, newest-first baseline as tiebreaker
async fn api_lobbies(
    State(state): State<AppState>,
    Query(params): Query<ViewerQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    state.engine.metrics.lobby_rank_requests.fetch_add(1, Ordering::Relaxed);
    let ranked = state
        .engine
        .rank_lobbies(params.viewer_id)
        .map_err(|e| map_engine_error(&state, e))?;
    Ok(Json(serde_json::json!(ranked)))
}

/// Invite suggestions: leader-only, excludes current members and pending
/// invites, closest reputation first
async fn api_invite_suggestions(
    State(state): State<AppState>,
    Path(lobby_id): Path<i64>,
    Query(params): Query<ViewerQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    state.engine.metrics.invite_requests.fetch_add(1, Ordering::Relaxed);

    let Some(viewer_id) = params.viewer_id else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "viewer_id_required"})),
        ));
    };

    // Leadership and team resolution stay at the boundary; the engine only
    // scores. The snapshot here and the one inside the engine call may
    // differ across a reload, which at worst yields an empty list.
    let snapshot = state.engine.store.snapshot();
    let Some(lobby) = snapshot.lobby(lobby_id) else {
        return Err(map_engine_error(&state, EngineError::LobbyNotFound(lobby_id)));
    };
    if lobby.leader_id != Some(viewer_id) {
        state.engine.metrics.forbidden_total.fetch_add(1, Ordering::Relaxed);
        return Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "leader_only"})),
        ));
    }
    let Some(team) = snapshot.team_for_lobby(lobby_id) else {
        return Err(map_engine_error(&state, EngineError::TeamNotFound(lobby_id)));
    };

    let candidates = state
        .engine
        .invite_candidates(viewer_id, team.id)
        .map_err(|e| map_engine_error(&state, e))?;
    Ok(Json(serde_json::json!(candidates)))
}

/// Engine + store stats
async fn api_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.engine.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    Json(state.engine.get_stats())
}

/// Prometheus metrics
async fn api_metrics(State(state): State<AppState>) -> String {
    state.engine.metrics.http_requests_total.fetch_add(1, Ordering::Relaxed);
    render_metrics(&state.engine)
}
