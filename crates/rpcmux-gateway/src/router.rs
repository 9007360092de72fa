//! Axum router wiring: the three channels plus ops endpoints.

use axum::routing::{get, post};
use axum::Router;

use crate::{app_state::AppState, ops, transport};

pub fn build_router(state: AppState) -> Router {
    let routes = state.cfg().gateway.routes.clone();
    Router::new()
        .route(&routes.socket, get(transport::ws::ws_upgrade))
        .route(&routes.duplex, post(transport::http::duplex))
        .route(&routes.plain, post(transport::http::plain))
        .route("/healthz", get(ops::healthz))
        .route("/metrics", get(ops::metrics))
        .with_state(state)
}
