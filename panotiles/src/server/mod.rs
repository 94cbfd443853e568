//! HTTP surface of the render service.
//!
//! - `state` bundles the cross-request coordination state (rate limiter,
//!   per-build locks, active-render set, status registry).
//! - `handlers` implement the endpoints; `routes` composes them.
//! - `pipeline` runs the two-phase generate-then-upload render.
//! - `render_server` owns lifecycle: listening, CORS, graceful shutdown.

mod cors;
mod error;
mod handlers;
mod pipeline;
mod render_server;
mod routes;
mod state;

pub use error::ApiError;
pub use render_server::RenderServer;
pub use state::{AppState, SharedState};
