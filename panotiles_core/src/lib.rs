//! Core types for the panotiles rendering service: identifiers and build
//! strings, the per-tenant configuration model, scene resolution, the
//! build-status registry and the tile manifest returned by the API.

pub mod client_config;
pub mod error;
pub mod ids;
pub mod manifest;
pub mod scene;
pub mod status;

pub use client_config::*;
pub use error::*;
pub use ids::*;
pub use manifest::*;
pub use scene::*;
pub use status::*;
