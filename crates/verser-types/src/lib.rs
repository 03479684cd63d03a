//! Shared domain and wire types for the Verser backend.

pub mod api;
pub mod events;
pub mod models;
