//! # panotiles
//!
//! A multi-tenant service that composites a configurable panorama from a
//! per-layer material selection, splits it into the six faces of a cubemap,
//! publishes a two-level JPEG tile pyramid to an object store, and answers
//! identical requests from cache.
//!
//! The binary serves the HTTP API (`panotiles serve`); this library exposes
//! the service configuration and the server for embedding in tests.

pub mod config;
pub mod loader;
pub mod server;

pub use panotiles_core as core;
pub use panotiles_image as image;
pub use panotiles_render as render;
pub use panotiles_store as store;
