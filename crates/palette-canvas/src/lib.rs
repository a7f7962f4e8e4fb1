//! Canvas mutation serializer.
//!
//! Every insertion into a canvas document goes through [`CanvasService`],
//! which holds the canvas's lock across read, placement, append and save.

pub mod layout;
pub mod locks;
pub mod service;

pub use layout::{LayoutPolicy, next_placement};
pub use locks::CanvasLocks;
pub use service::{CanvasService, MediaInsert, PlacedMedia};
