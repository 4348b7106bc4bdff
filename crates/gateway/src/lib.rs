//! Gateway: HTTP and WebSocket surface over the session service.
//!
//! Lifecycle:
//! 1. Load config, open the snapshot store
//! 2. Build the session service with the configured protocol backend
//! 3. Serve the REST routes and the `/api/events` relay
//!
//! All session semantics live in `switchboard-sessions`; handlers here only
//! validate input and map results onto HTTP.

pub mod error;
pub mod events;
pub mod messages;
pub mod server;
pub mod sessions;
pub mod state;

pub use {
    error::ApiError,
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
