//! Direction type for representing image orientation.
//!
//! Direction matrices represent orientation of image axes in physical space.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

/// Direction matrix representing image orientation.
///
/// Column i holds the direction cosines of the i-th image axis (x, y, z)
/// in physical space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction3(pub Matrix3<f64>);

impl Direction3 {
    /// Create an identity direction matrix (no rotation).
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    /// Build from the three axis direction columns.
    pub fn from_columns(x: [f64; 3], y: [f64; 3], z: [f64; 3]) -> Self {
        Self(Matrix3::new(
            x[0], y[0], z[0], //
            x[1], y[1], z[1], //
            x[2], y[2], z[2],
        ))
    }

    /// Access the underlying matrix.
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Check if direction matrix is orthogonal (rotation or reflection).
    pub fn is_orthogonal(&self) -> bool {
        let product = self.0 * self.0.transpose();
        (product - Matrix3::identity()).abs().max() < 1e-6
    }

    /// Compute the determinant of the direction matrix.
    pub fn determinant(&self) -> f64 {
        self.0.determinant()
    }

    /// Element-wise comparison within an absolute tolerance.
    pub fn approx_eq(&self, other: &Direction3, tolerance: f64) -> bool {
        (self.0 - other.0).abs().max() <= tolerance
    }
}

impl Default for Direction3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Index<(usize, usize)> for Direction3 {
    type Output = f64;

    fn index(&self, index: (usize, usize)) -> &f64 {
        &self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let d = Direction3::identity();
        assert!(d.is_orthogonal());
        assert!((d.determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_from_columns_layout() {
        // LPS-style flip of the first two axes.
        let d = Direction3::from_columns([-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, 1.0]);
        assert_eq!(d[(0, 0)], -1.0);
        assert_eq!(d[(1, 1)], -1.0);
        assert!(d.is_orthogonal());
        assert!((d.determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_approx_eq() {
        let a = Direction3::identity();
        let mut b = Direction3::identity();
        b.0[(0, 1)] = 1e-7;
        assert!(a.approx_eq(&b, 1e-6));
        b.0[(0, 1)] = 0.1;
        assert!(!a.approx_eq(&b, 1e-6));
    }

    #[test]
    fn test_shear_is_not_orthogonal() {
        let d = Direction3::from_columns([1.0, 0.0, 0.0], [0.5, 1.0, 0.0], [0.0, 0.0, 1.0]);
        assert!(!d.is_orthogonal());
    }
}
