//! Realtime presence and chat relay served at `/ws`.

pub mod connection;
pub mod dispatcher;
pub mod heartbeat;

pub use dispatcher::{Outbound, Relay};
