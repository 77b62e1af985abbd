//! Volume type with physical metadata.
//!
//! This module provides the Volume struct which represents a scalar 3D
//! image (intensity or label values) with tensor data and the physical space
//! metadata (origin, spacing, direction) needed by the registration engine.

use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};

use super::grid::GridGeometry;
use crate::error::{PipelineError, Result};
use crate::spatial::{Direction3, Point3, Spacing3};

/// Scalar 3D volume with physical metadata.
///
/// # Coordinate Systems
/// * **Index Space**: the tensor is laid out `[z, y, x]`; continuous indices
///   are written `(x, y, z)`.
/// * **Physical Space**: millimetres, `point = origin + Direction * (index * spacing)`.
///
/// # Examples
/// ```rust
/// use atlasreg_core::{Direction3, Point3, Spacing3, Volume};
/// use burn::tensor::Tensor;
/// use burn_ndarray::NdArray;
///
/// type Backend = NdArray<f32>;
///
/// let device = Default::default();
/// let data = Tensor::<Backend, 3>::zeros([10, 10, 10], &device);
/// let volume = Volume::new(
///     data,
///     Point3::origin(),
///     Spacing3::new(1.0, 1.0, 1.0),
///     Direction3::identity(),
/// );
/// assert_eq!(volume.shape(), [10, 10, 10]);
/// ```
#[derive(Debug, Clone)]
pub struct Volume<B: Backend> {
    /// Voxel values, `[z, y, x]`.
    data: Tensor<B, 3>,
    /// Physical coordinate of voxel (0, 0, 0).
    origin: Point3,
    /// Physical distance between voxels along x, y, z.
    spacing: Spacing3,
    /// Orientation of the image axes.
    direction: Direction3,
}

impl<B: Backend> Volume<B> {
    /// Create a new volume with the given data and metadata.
    pub fn new(data: Tensor<B, 3>, origin: Point3, spacing: Spacing3, direction: Direction3) -> Self {
        Self {
            data,
            origin,
            spacing,
            direction,
        }
    }

    /// Create a volume on an existing grid.
    ///
    /// Fails with [`PipelineError::GridMismatch`] when the tensor shape differs
    /// from the grid shape.
    pub fn from_geometry(data: Tensor<B, 3>, geometry: &GridGeometry) -> Result<Self> {
        let shape = data.dims();
        if shape != geometry.shape {
            return Err(PipelineError::GridMismatch {
                context: "volume construction".to_string(),
                expected: format!("{:?}", geometry.shape),
                actual: format!("{:?}", shape),
            });
        }
        Ok(Self::new(data, geometry.origin, geometry.spacing, geometry.direction))
    }

    /// Get the voxel data tensor.
    pub fn data(&self) -> &Tensor<B, 3> {
        &self.data
    }

    /// Get the origin (physical coordinate of first voxel).
    pub fn origin(&self) -> &Point3 {
        &self.origin
    }

    /// Get the spacing (physical distance between voxels).
    pub fn spacing(&self) -> &Spacing3 {
        &self.spacing
    }

    /// Get the direction (orientation matrix).
    pub fn direction(&self) -> &Direction3 {
        &self.direction
    }

    /// Get the tensor shape `[z, y, x]`.
    pub fn shape(&self) -> [usize; 3] {
        self.data.dims()
    }

    /// Sampling grid of this volume.
    pub fn geometry(&self) -> GridGeometry {
        GridGeometry::new(self.shape(), self.spacing, self.origin, self.direction)
    }

    /// Copy voxel values to the host in `[z, y, x]` order.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        self.data
            .to_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| PipelineError::format(format!("Failed to read voxel data: {:?}", e)))
    }

    /// Minimum and maximum voxel value.
    ///
    /// An empty volume reports `(0.0, 0.0)`.
    pub fn intensity_range(&self) -> (f64, f64) {
        if self.geometry().voxel_count() == 0 {
            return (0.0, 0.0);
        }
        let min = self.data.clone().min().into_scalar().elem::<f64>();
        let max = self.data.clone().max().into_scalar().elem::<f64>();
        (min, max)
    }

    /// Sorted distinct voxel values.
    ///
    /// Intended for label volumes; for intensity volumes this can be as large
    /// as the voxel count.
    pub fn distinct_values(&self) -> Result<Vec<f32>> {
        let mut values = self.to_vec()?;
        values.retain(|v| !v.is_nan());
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        Ok(values)
    }

    /// Keep voxels where `mask > 0`, zero elsewhere.
    ///
    /// The mask must be on a compatible grid.
    pub fn masked(&self, mask: &Volume<B>) -> Result<Self> {
        self.geometry().ensure_compatible(&mask.geometry(), "mask application")?;
        let keep = mask.data.clone().greater_elem(0.0);
        let data = self.data.clone().mask_fill(keep.bool_not(), 0.0);
        Ok(Self {
            data,
            origin: self.origin,
            spacing: self.spacing,
            direction: self.direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    fn volume_from(values: Vec<f32>, shape: [usize; 3]) -> Volume<Backend> {
        let device = Default::default();
        let data = Tensor::<Backend, 3>::from_data(TensorData::new(values, shape), &device);
        Volume::new(data, Point3::origin(), Spacing3::new(1.0, 1.0, 1.0), Direction3::identity())
    }

    #[test]
    fn test_volume_creation() {
        let device = Default::default();
        let data = Tensor::<Backend, 3>::zeros([4, 5, 6], &device);
        let origin = Point3::new(1.0, 2.0, 3.0);
        let spacing = Spacing3::new(0.5, 0.5, 2.0);
        let volume = Volume::new(data, origin, spacing, Direction3::identity());

        assert_eq!(volume.shape(), [4, 5, 6]);
        assert_eq!(volume.origin(), &origin);
        assert_eq!(volume.spacing(), &spacing);
        assert_eq!(volume.geometry().voxel_count(), 120);
    }

    #[test]
    fn test_from_geometry_rejects_wrong_shape() {
        let reference = volume_from(vec![0.0; 8], [2, 2, 2]);
        let device = Default::default();
        let data = Tensor::<Backend, 3>::zeros([2, 2, 3], &device);
        let err = Volume::from_geometry(data, &reference.geometry()).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_intensity_range() {
        let volume = volume_from(vec![-3.0, 0.0, 1.5, 7.25, 2.0, 2.0, 0.0, 1.0], [2, 2, 2]);
        let (min, max) = volume.intensity_range();
        assert_eq!(min, -3.0);
        assert_eq!(max, 7.25);
    }

    #[test]
    fn test_distinct_values() {
        let volume = volume_from(vec![3.0, 0.0, 3.0, 1.0, 1.0, 0.0, 12.0, 3.0], [2, 2, 2]);
        assert_eq!(volume.distinct_values().unwrap(), vec![0.0, 1.0, 3.0, 12.0]);
    }

    #[test]
    fn test_masked_keeps_brain_voxels() {
        let volume = volume_from(vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0], [2, 2, 2]);
        let mask = volume_from(vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0], [2, 2, 2]);
        let masked = volume.masked(&mask).unwrap();
        assert_eq!(
            masked.to_vec().unwrap(),
            vec![10.0, 0.0, 30.0, 0.0, 0.0, 0.0, 70.0, 80.0]
        );
    }

    #[test]
    fn test_masked_rejects_other_grid() {
        let volume = volume_from(vec![0.0; 8], [2, 2, 2]);
        let mask = volume_from(vec![1.0; 12], [2, 2, 3]);
        let err = volume.masked(&mask).unwrap_err();
        assert!(matches!(err, PipelineError::GridMismatch { .. }));
    }
}
