// WebSocket surface: the upgrade route and everything a live socket needs.

pub mod handler;
pub mod protocol;

use axum::routing::get;
use axum::Router;

use crate::GatewayState;

pub fn router(state: GatewayState) -> Router {
    Router::new().route("/v1/ws", get(handler::ws_upgrade)).with_state(state)
}
