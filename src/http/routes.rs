//! HTTP route definitions

use axum::{
    extract::{Extension, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{require_auth, AuthenticatedPlayer};
use crate::matchmaking::MatchRequest;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::{GameMode, RoomSummary};

const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/rooms", get(rooms_handler));

    // Queue routes (auth required)
    let protected_routes = Router::new()
        .route("/match/join", post(match_join_handler))
        .route("/match/leave", post(match_leave_handler))
        .route("/match/status", get(match_status_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api_routes = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TimeoutLayer::new(API_TIMEOUT));

    Router::new()
        .route("/ws", get(ws_handler))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    rooms: usize,
    players: usize,
    connections: usize,
    stats_enabled: bool,
    queues: HashMap<GameMode, usize>,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let queues = state.matchmaking.all_queue_depths().await;

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        rooms: state.rooms.len(),
        players: state.rooms.total_players(),
        connections: state.connections.len(),
        stats_enabled: state.stats.is_enabled(),
        queues,
    })
}

// ============================================================================
// Room listing
// ============================================================================

#[derive(Serialize)]
struct RoomsResponse {
    rooms: Vec<RoomSummary>,
}

async fn rooms_handler(State(state): State<AppState>) -> Json<RoomsResponse> {
    Json(RoomsResponse {
        rooms: state.rooms.list(false),
    })
}

// ============================================================================
// Matchmaking endpoints
// ============================================================================

#[derive(Deserialize)]
struct JoinMatchRequest {
    #[serde(default = "default_character")]
    character_id: u32,
    mode: GameMode,
    #[serde(default)]
    session_id: Option<String>,
}

fn default_character() -> u32 {
    1
}

#[derive(Serialize)]
struct JoinMatchResponse {
    status: &'static str,
    mode: GameMode,
    queue_size: usize,
}

async fn match_join_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedPlayer>,
    Json(req): Json<JoinMatchRequest>,
) -> Result<Json<JoinMatchResponse>, AppError> {
    if req.character_id == 0 {
        return Err(AppError::BadRequest("character_id must be positive".to_string()));
    }

    let session_id = req
        .session_id
        .or_else(|| auth.claims.session_id.clone())
        .unwrap_or_default();

    state
        .matchmaking
        .enqueue(MatchRequest::new(
            auth.player_id,
            req.character_id,
            req.mode,
            session_id,
        ))
        .await;

    Ok(Json(JoinMatchResponse {
        status: "queued",
        mode: req.mode,
        queue_size: state.matchmaking.queue_depth(req.mode).await,
    }))
}

#[derive(Deserialize)]
struct LeaveMatchRequest {
    mode: GameMode,
}

#[derive(Serialize)]
struct LeaveMatchResponse {
    removed: bool,
}

async fn match_leave_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedPlayer>,
    Json(req): Json<LeaveMatchRequest>,
) -> Json<LeaveMatchResponse> {
    let removed = state.matchmaking.dequeue(auth.player_id, req.mode).await;
    Json(LeaveMatchResponse { removed })
}

#[derive(Serialize)]
struct MatchStatusResponse {
    queues: HashMap<GameMode, usize>,
    assigned_room: Option<Uuid>,
}

async fn match_status_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedPlayer>,
) -> Json<MatchStatusResponse> {
    Json(MatchStatusResponse {
        queues: state.matchmaking.all_queue_depths().await,
        assigned_room: state.matchmaking.assignment(auth.player_id),
    })
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::room::{RoomConfig, RoomRules};
    use crate::http::middleware::token_for;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    const SECRET: &str = "route-secret";

    fn state() -> AppState {
        let config = Config::from_lookup(|key| match key {
            "JWT_SECRET" => Some(SECRET.to_string()),
            _ => None,
        })
        .unwrap();
        AppState::new(config)
    }

    async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn authed(method: Method, uri: &str, player_id: i64, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token_for(player_id, SECRET)))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let state = state();
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = call(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rooms"], 0);
        assert_eq!(body["queues"]["death_match"], 0);
        assert_eq!(body["stats_enabled"], false);
    }

    #[tokio::test]
    async fn rooms_lists_public_rooms_only() {
        let state = state();
        state
            .rooms
            .create_room(RoomConfig::new("open", GameMode::DeathMatch))
            .unwrap();
        let mut hidden = RoomConfig::new("hidden", GameMode::DeathMatch);
        hidden.rules = RoomRules {
            private: true,
            ..RoomRules::default()
        };
        state.rooms.create_room(hidden).unwrap();

        let request = Request::get("/rooms").body(Body::empty()).unwrap();
        let (status, body) = call(&state, request).await;

        assert_eq!(status, StatusCode::OK);
        let rooms = body["rooms"].as_array().unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0]["name"], "open");
    }

    #[tokio::test]
    async fn queue_routes_require_token() {
        let state = state();
        let request = Request::post("/match/join")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"mode":"death_match"}"#))
            .unwrap();
        let (status, _) = call(&state, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn join_status_and_leave_round_trip() {
        let state = state();

        let join = authed(
            Method::POST,
            "/match/join",
            7,
            serde_json::json!({ "character_id": 3, "mode": "team_death_match" }),
        );
        let (status, body) = call(&state, join).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");
        assert_eq!(body["queue_size"], 1);

        let status_req = authed(Method::GET, "/match/status", 7, Value::Null);
        let (_, body) = call(&state, status_req).await;
        assert_eq!(body["queues"]["team_death_match"], 1);
        assert!(body["assigned_room"].is_null());

        let leave = authed(
            Method::POST,
            "/match/leave",
            7,
            serde_json::json!({ "mode": "team_death_match" }),
        );
        let (_, body) = call(&state, leave).await;
        assert_eq!(body["removed"], true);
        assert_eq!(state.matchmaking.queue_depth(GameMode::TeamDeathMatch).await, 0);
    }

    #[tokio::test]
    async fn zero_character_is_rejected() {
        let state = state();
        let join = authed(
            Method::POST,
            "/match/join",
            7,
            serde_json::json!({ "character_id": 0, "mode": "death_match" }),
        );
        let (status, body) = call(&state, join).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("character_id"));
    }
}
