use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::chat::handlers as chat_handlers;
use crate::presence::handlers as presence_handlers;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    // Presence reads and sign-out (x-user-id required by the AuthUser extractor)
    // Note: /api/presence/offline is a static segment and wins over {user_id}.
    let presence_routes = Router::new()
        .route("/api/presence/offline", post(presence_handlers::sign_out))
        .route("/api/presence/{user_id}", get(presence_handlers::get_presence))
        .route(
            "/api/groups/{group_id}/online",
            get(presence_handlers::group_online),
        );

    // Read receipts and mutation fanout
    let chat_routes = Router::new()
        .route(
            "/api/chats/{chat_type}/{chat_id}/read",
            post(chat_handlers::mark_read),
        )
        .route(
            "/api/chats/{chat_type}/{chat_id}/events",
            post(chat_handlers::publish_event),
        );

    // WebSocket upgrade (auth happens in-band after the upgrade)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/api/health", get(health_check));

    Router::new()
        .merge(presence_routes)
        .merge(chat_routes)
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.connections.len(),
    }))
}
