//! Router composition. Deliberately tiny and declarative.

use crate::server::handlers;
use crate::server::state::SharedState;
use axum::Router;
use axum::routing::{get, post};

pub fn build_router(state: SharedState) -> Router {
	Router::new()
		.route("/api/render", post(handlers::render))
		.route("/api/render2d", post(handlers::render2d))
		.route("/api/render/events", get(handlers::render_events))
		.route("/api/status/{build}", get(handlers::status))
		.route("/api/health", get(handlers::health))
		.route(
			"/panotiles_cache/cubemap/{client}/{scene}/tiles/{build}/{filename}",
			get(handlers::legacy_tile),
		)
		.with_state(state)
}
