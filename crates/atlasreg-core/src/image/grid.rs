//! Sampling grid description.
//!
//! A grid is everything about a volume except its voxel values: the tensor
//! shape and the mapping from voxel indices to physical coordinates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::spatial::{Direction3, Point3, Spacing3, Vector3};

/// Absolute tolerance for spacing and direction comparisons.
///
/// NIfTI stores the affine as `f32`, so values read back from disk differ
/// from the written `f64` values in the 7th significant digit.
pub const GRID_TOLERANCE: f64 = 1e-4;

/// Sampling grid of a volume.
///
/// `shape` follows the tensor layout `[z, y, x]`; `spacing`, `origin` and the
/// columns of `direction` follow the physical axis order `(x, y, z)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub shape: [usize; 3],
    pub spacing: Spacing3,
    pub origin: Point3,
    pub direction: Direction3,
}

impl GridGeometry {
    pub fn new(shape: [usize; 3], spacing: Spacing3, origin: Point3, direction: Direction3) -> Self {
        Self {
            shape,
            spacing,
            origin,
            direction,
        }
    }

    /// Total number of voxels.
    pub fn voxel_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Two grids are compatible when shape, spacing and orientation agree.
    ///
    /// The origin is not compared, so a re-centred volume on the same
    /// lattice can reuse a transform.
    pub fn is_compatible(&self, other: &GridGeometry) -> bool {
        self.shape == other.shape
            && (self.spacing - other.spacing).abs().max() <= GRID_TOLERANCE
            && self.direction.approx_eq(&other.direction, GRID_TOLERANCE)
    }

    /// Fail with [`PipelineError::GridMismatch`] unless `actual` is compatible with `self`.
    pub fn ensure_compatible(&self, actual: &GridGeometry, context: &str) -> Result<()> {
        if self.is_compatible(actual) {
            Ok(())
        } else {
            Err(PipelineError::GridMismatch {
                context: context.to_string(),
                expected: self.to_string(),
                actual: actual.to_string(),
            })
        }
    }

    /// Convert a continuous index `(x, y, z)` to a physical point.
    ///
    /// `point = origin + Direction * (index * spacing)`
    pub fn index_to_physical(&self, index: &Point3) -> Point3 {
        let scaled = Vector3::new(
            index.x * self.spacing.x,
            index.y * self.spacing.y,
            index.z * self.spacing.z,
        );
        self.origin + self.direction.matrix() * scaled
    }

    /// Convert a physical point to a continuous index `(x, y, z)`.
    ///
    /// Returns `None` when the direction matrix is singular.
    pub fn physical_to_index(&self, point: &Point3) -> Option<Point3> {
        let inv_dir = self.direction.matrix().try_inverse()?;
        let rotated = inv_dir * (*point - self.origin);
        Some(Point3::new(
            rotated.x / self.spacing.x,
            rotated.y / self.spacing.y,
            rotated.z / self.spacing.z,
        ))
    }

    /// Axis-aligned physical bounding box of the voxel centres.
    pub fn physical_bounds(&self) -> (Point3, Point3) {
        let [nz, ny, nx] = self.shape;
        let last = |n: usize| n.saturating_sub(1) as f64;
        let mut min = Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let mut max = Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for &x in &[0.0, last(nx)] {
            for &y in &[0.0, last(ny)] {
                for &z in &[0.0, last(nz)] {
                    let p = self.index_to_physical(&Point3::new(x, y, z));
                    for i in 0..3 {
                        min[i] = min[i].min(p[i]);
                        max[i] = max[i].max(p[i]);
                    }
                }
            }
        }
        (min, max)
    }
}

impl fmt::Display for GridGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [nz, ny, nx] = self.shape;
        write!(
            f,
            "{}x{}x{} voxels @ {:.4}x{:.4}x{:.4} mm",
            nx, ny, nz, self.spacing.x, self.spacing.y, self.spacing.z
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(shape: [usize; 3], spacing: [f64; 3]) -> GridGeometry {
        GridGeometry::new(
            shape,
            Spacing3::new(spacing[0], spacing[1], spacing[2]),
            Point3::origin(),
            Direction3::identity(),
        )
    }

    #[test]
    fn test_compatible_ignores_origin() {
        let a = grid([4, 5, 6], [1.0, 1.0, 2.0]);
        let mut b = a.clone();
        b.origin = Point3::new(10.0, -3.0, 7.5);
        assert!(a.is_compatible(&b));
    }

    #[test]
    fn test_shape_mismatch() {
        let a = grid([4, 5, 6], [1.0, 1.0, 2.0]);
        let b = grid([4, 5, 7], [1.0, 1.0, 2.0]);
        let err = a.ensure_compatible(&b, "resample").unwrap_err();
        assert!(err.is_format());
        assert!(err.to_string().contains("resample"));
    }

    #[test]
    fn test_spacing_tolerance() {
        let a = grid([4, 5, 6], [0.5, 0.5, 0.8]);
        let b = grid([4, 5, 6], [0.500_001, 0.5, 0.8]);
        let c = grid([4, 5, 6], [0.6, 0.5, 0.8]);
        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&c));
    }

    #[test]
    fn test_orientation_mismatch() {
        let a = grid([4, 5, 6], [1.0, 1.0, 1.0]);
        let mut b = a.clone();
        b.direction = Direction3::from_columns([-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 1.0]);
        assert!(!a.is_compatible(&b));
    }

    #[test]
    fn test_display_uses_xyz_order() {
        let a = grid([3, 4, 5], [1.0, 2.0, 3.0]);
        assert!(a.to_string().starts_with("5x4x3 voxels"));
    }

    #[test]
    fn test_physical_bounds() {
        let mut a = grid([3, 4, 5], [2.0, 1.0, 0.5]);
        a.origin = Point3::new(-1.0, 0.0, 1.0);
        let (min, max) = a.physical_bounds();
        assert!((min.x + 1.0).abs() < 1e-12);
        assert!((max.x - 7.0).abs() < 1e-12);
        assert!((max.y - 3.0).abs() < 1e-12);
        assert!((max.z - 2.0).abs() < 1e-12);
    }
}
