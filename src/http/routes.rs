//! HTTP route definitions

use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::session::MatchInfo;
use crate::http::middleware::{require_ticket, AuthenticatedUser};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

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
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (the socket checks its own ticket)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler));

    // Ticket holders only
    let protected_routes = Router::new()
        .route("/matches", get(list_matches_handler))
        .route("/matches/:id/scoreboard", get(scoreboard_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_ticket));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CompressionLayer::new())
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
    active_matches: usize,
    active_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        active_players: state.match_registry.total_players(),
    })
}

// ============================================================================
// Match endpoints
// ============================================================================

#[derive(Serialize)]
struct MatchListResponse {
    matches: Vec<MatchInfo>,
    /// Match the ticket holder is currently placed in
    current_match: Option<Uuid>,
}

async fn list_matches_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> Json<MatchListResponse> {
    Json(MatchListResponse {
        matches: state.match_registry.list(),
        current_match: state.matchmaking.get_player_match(&auth.user_id),
    })
}

#[derive(Deserialize)]
struct ScoreboardQuery {
    #[serde(default)]
    format: Option<String>,
}

async fn scoreboard_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ScoreboardQuery>,
) -> Result<Response, AppError> {
    let handle = state
        .match_registry
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("match {}", id)))?;
    let scoreboard = handle.scoreboard();

    match query.format.as_deref() {
        Some("text") => Ok(scoreboard.render_table().into_response()),
        None | Some("json") => Ok(Json(scoreboard).into_response()),
        Some(other) => Err(AppError::BadRequest(format!("unknown format {}", other))),
    }
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
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
    use crate::config::{Config, GameConfig};
    use crate::game::GameMatch;
    use crate::http::middleware::{issue_ticket, TicketClaims};
    use crate::util::time::unix_secs;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const SECRET: &str = "route-secret";

    fn app_state() -> AppState {
        AppState::new(Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".into(),
            session_secret: SECRET.into(),
            client_origin: "http://localhost:3000".into(),
            game: GameConfig::default(),
        })
    }

    fn bearer() -> String {
        let ticket = issue_ticket(
            &TicketClaims {
                sub: Uuid::new_v4(),
                name: "alpha".into(),
                exp: unix_secs() + 60,
            },
            SECRET,
        )
        .unwrap();
        format!("Bearer {}", ticket)
    }

    async fn get(state: AppState, uri: &str, auth: Option<String>) -> (StatusCode, String) {
        let mut request = Request::builder().uri(uri);
        if let Some(auth) = auth {
            request = request.header("Authorization", auth);
        }
        let response = build_router(state)
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (status, body) = get(app_state(), "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["active_matches"], 0);
    }

    #[tokio::test]
    async fn test_matches_require_ticket() {
        let (status, _) = get(app_state(), "/matches", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = get(app_state(), "/matches", Some(bearer())).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["matches"], serde_json::json!([]));
        assert!(json["current_match"].is_null());
    }

    #[tokio::test]
    async fn test_scoreboard_lookup() {
        let state = app_state();
        let (_game, handle) = GameMatch::new(Uuid::new_v4(), 1, &state.config.game);
        let id = handle.id;
        state.match_registry.insert(handle);

        let (status, body) =
            get(state.clone(), &format!("/matches/{}/scoreboard", id), Some(bearer())).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["phase"], "waiting");

        let (status, body) = get(
            state.clone(),
            &format!("/matches/{}/scoreboard?format=text", id),
            Some(bearer()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("No players in room"));

        let (status, _) = get(
            state,
            &format!("/matches/{}/scoreboard", Uuid::new_v4()),
            Some(bearer()),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
