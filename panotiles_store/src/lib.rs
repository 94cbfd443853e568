//! Object-store plumbing for the panotiles service.
//!
//! Everything that talks to blob storage lives here: the backend-polymorphic
//! [`ObjectStore`] trait with its local-filesystem and S3-compatible (R2)
//! implementations, the bounded [`TileUploadQueue`], and the
//! [`AssetResolver`] that falls back from the local cache to a remote
//! download.

pub mod factory;
pub mod local;
pub mod r2;
pub mod resolver;
pub mod traits;
pub mod upload_queue;

pub use factory::*;
pub use local::*;
pub use r2::*;
pub use resolver::*;
pub use traits::*;
pub use upload_queue::*;
