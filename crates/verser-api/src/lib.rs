//! REST handlers for users, communities, memberships and messages.

pub mod authz;
pub mod communities;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod users;

use std::sync::Arc;

use verser_db::SharedStorage;
use verser_gateway::Relay;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub storage: SharedStorage,
    pub relay: Relay,
    pub jwt_secret: String,
}
