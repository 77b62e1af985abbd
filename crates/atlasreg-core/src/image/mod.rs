//! Volume types and operations.
//!
//! This module provides the Volume type and the sampling-grid description
//! used to decide whether two volumes can be combined voxel by voxel.

pub mod grid;
pub mod volume;

pub use grid::{GridGeometry, GRID_TOLERANCE};
pub use volume::Volume;
