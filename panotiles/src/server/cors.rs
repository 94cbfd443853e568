//! CORS policy: exact-match origins from configuration.
//!
//! An empty origin list allows nothing; the service warns instead of
//! silently opening up, since the usual cause is a missing `CORS_ORIGINS`.

use axum::http::{HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};

pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
	if allowed_origins.is_empty() {
		log::warn!("CORS_ORIGINS is empty; no cross-origin requests will be allowed");
	}

	let origins: Vec<HeaderValue> = allowed_origins
		.iter()
		.filter_map(|origin| match origin.parse::<HeaderValue>() {
			Ok(value) => Some(value),
			Err(_) => {
				log::warn!("ignoring unparseable CORS origin '{origin}'");
				None
			}
		})
		.collect();

	CorsLayer::new()
		.allow_origin(AllowOrigin::list(origins))
		.allow_methods([Method::GET, Method::POST, Method::OPTIONS])
		.allow_headers([header::CONTENT_TYPE])
}
