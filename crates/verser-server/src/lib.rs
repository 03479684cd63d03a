//! Router assembly for the Verser server binary.

pub mod config;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use verser_api::middleware::require_auth;
use verser_api::{AppState, AppStateInner, communities, messages, users};
use verser_db::{Database, MemoryStore, SharedStorage};
use verser_gateway::{Relay, connection};

use crate::config::StorageBackend;

pub fn open_storage(backend: &StorageBackend) -> Result<SharedStorage> {
    Ok(match backend {
        StorageBackend::Sqlite(path) => Arc::new(Database::open(path)?),
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    })
}

/// Shared state for REST handlers and the relay, built on one storage handle.
pub fn app_state(storage: SharedStorage, jwt_secret: String) -> AppState {
    let relay = Relay::new(storage.clone());
    Arc::new(AppStateInner {
        storage,
        relay,
        jwt_secret,
    })
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/api/users", post(users::register))
        .route("/ws", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/api/users/{user_id}", get(users::get_user))
        .route("/api/users/{user_id}/communities", get(users::user_communities))
        .route(
            "/api/communities",
            get(communities::list_communities).post(communities::create_community),
        )
        .route(
            "/api/communities/{community_id}",
            get(communities::get_community).delete(communities::delete_community),
        )
        .route("/api/communities/{community_id}/join", post(communities::join_community))
        .route("/api/communities/{community_id}/leave", post(communities::leave_community))
        .route("/api/communities/{community_id}/members", get(communities::list_members))
        .route(
            "/api/communities/{community_id}/members/{user_id}",
            delete(communities::remove_member),
        )
        .route(
            "/api/communities/{community_id}/members/{user_id}/role",
            put(communities::update_member_role),
        )
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let relay = state.relay.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, relay))
}
