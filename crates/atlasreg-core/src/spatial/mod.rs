//! Spatial types for representing points, spacing, and direction matrices.
//!
//! Points and vectors are plain nalgebra types; the direction matrix is a
//! thin wrapper so that orientation checks live next to the data.

pub mod direction;

pub use direction::Direction3;

/// Physical point (mm).
pub type Point3 = nalgebra::Point3<f64>;
/// Physical displacement (mm).
pub type Vector3 = nalgebra::Vector3<f64>;
/// Distance between adjacent voxels along x, y, z (mm).
pub type Spacing3 = nalgebra::Vector3<f64>;
