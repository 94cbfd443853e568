//! The render pipeline's two image stages: the compositor that flattens a
//! scene from (base, layers, selection) and the splitter that turns the
//! flattened panorama into cubemap JPEG tiles.

pub mod cubemap;
pub mod stack;

pub use cubemap::*;
pub use stack::*;
