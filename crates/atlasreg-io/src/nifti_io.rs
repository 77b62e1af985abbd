//! NIfTI volume loader and saver.
//!
//! Geometry is read from the sform when present, otherwise the qform,
//! otherwise plain pixdim scaling. Volumes are written with an sform so that
//! spacing, origin and orientation survive a save/load cycle.

use std::io;
use std::path::Path;

use atlasreg_core::{Direction3, GridGeometry, PipelineError, Point3, Result, Spacing3, Volume};
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

/// NIFTI_XFORM_SCANNER_ANAT
const XFORM_SCANNER_ANAT: i16 = 1;
/// NIFTI_UNITS_MM
const UNITS_MM: u8 = 2;

/// Read a 3D NIfTI volume (`.nii` or `.nii.gz`).
///
/// A 4D file is accepted only when its fourth axis has length 1.
///
/// # Errors
/// * [`PipelineError::Io`] if the file is missing or unreadable
/// * [`PipelineError::Format`] if it cannot be parsed as a 3D NIfTI volume
pub fn read_nifti<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Volume<B>> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|e| PipelineError::io(path, e))?;
    if !metadata.is_file() {
        return Err(PipelineError::io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }

    let obj = ReaderOptions::new().read_file(path).map_err(|e| {
        PipelineError::format(format!("{} is not a readable NIfTI volume: {}", path.display(), e))
    })?;
    let (origin, spacing, direction) = decompose_affine(&header_affine(obj.header()));
    if !direction.is_orthogonal() {
        tracing::warn!(path = %path.display(), "affine is sheared; resampled output may be distorted");
    }

    let array = obj
        .into_volume()
        .into_ndarray::<f32>()
        .map_err(|e| PipelineError::format(format!("Failed to decode voxels of {}: {}", path.display(), e)))?;
    let array = into_3d(array, path)?;

    // NIfTI arrays are indexed [x, y, z]; tensors are laid out [z, y, x].
    let (nx, ny, nz) = array.dim();
    if nx * ny * nz == 0 {
        return Err(PipelineError::format(format!("{} has an empty voxel grid", path.display())));
    }
    let mut data = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                data.push(array[[x, y, z]]);
            }
        }
    }

    let tensor = Tensor::<B, 3>::from_data(TensorData::new(data, Shape::new([nz, ny, nx])), device);
    tracing::debug!(path = %path.display(), shape = ?[nx, ny, nz], "loaded NIfTI volume");

    Ok(Volume::new(tensor, origin, spacing, direction))
}

/// Write a volume to a NIfTI file as `float32`.
///
/// The file is gzip-compressed when the path ends in `.gz`. The output
/// directory must already exist; see [`ensure_output_dir`].
///
/// # Errors
/// * [`PipelineError::Io`] if the directory is missing or the write fails
/// * [`PipelineError::Format`] if the voxel data cannot be read back from the tensor
pub fn write_nifti<B: Backend, P: AsRef<Path>>(path: P, volume: &Volume<B>) -> Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(PipelineError::io(
            parent,
            io::Error::new(io::ErrorKind::NotFound, "output directory does not exist"),
        ));
    }

    let values = volume.to_vec()?;
    let [nz, ny, nx] = volume.shape();
    let array = Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| values[(z * ny + y) * nx + x]);

    let header = geometry_header(&volume.geometry());
    WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(&array)
        .map_err(|e| PipelineError::io(path, io::Error::other(e.to_string())))?;

    tracing::debug!(path = %path.display(), grid = %volume.geometry(), "wrote NIfTI volume");
    Ok(())
}

/// Create a directory and its parents if absent.
///
/// Safe to call concurrently for the same directory.
pub fn ensure_output_dir<P: AsRef<Path>>(dir: P) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))
}

fn into_3d(array: ArrayD<f32>, path: &Path) -> Result<Array3<f32>> {
    let shape = array.shape().to_vec();
    let array = match shape.len() {
        3 => array,
        4 if shape[3] == 1 => array.index_axis_move(Axis(3), 0),
        _ => {
            return Err(PipelineError::format(format!(
                "Expected a 3D NIfTI volume in {}, found shape {:?}",
                path.display(),
                shape
            )))
        }
    };
    array
        .into_dimensionality::<Ix3>()
        .map_err(|e| PipelineError::format(format!("Unexpected dimensionality in {}: {}", path.display(), e)))
}

/// Voxel-to-world affine rows (`[row][col]`, last row implied `[0, 0, 0, 1]`).
fn header_affine(header: &NiftiHeader) -> [[f64; 4]; 3] {
    let row = |r: [f32; 4]| [r[0] as f64, r[1] as f64, r[2] as f64, r[3] as f64];

    if header.sform_code > 0 {
        [row(header.srow_x), row(header.srow_y), row(header.srow_z)]
    } else if header.qform_code > 0 {
        // Quaternion form, see the NIfTI-1 standard.
        let b = header.quatern_b as f64;
        let c = header.quatern_c as f64;
        let d = header.quatern_d as f64;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();

        let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };

        let r11 = a * a + b * b - c * c - d * d;
        let r12 = 2.0 * b * c - 2.0 * a * d;
        let r13 = 2.0 * b * d + 2.0 * a * c;

        let r21 = 2.0 * b * c + 2.0 * a * d;
        let r22 = a * a + c * c - b * b - d * d;
        let r23 = 2.0 * c * d - 2.0 * a * b;

        let r31 = 2.0 * b * d - 2.0 * a * c;
        let r32 = 2.0 * c * d + 2.0 * a * b;
        let r33 = a * a + d * d - c * c - b * b;

        let dx = header.pixdim[1] as f64;
        let dy = header.pixdim[2] as f64;
        let dz = header.pixdim[3] as f64 * qfac;

        [
            [r11 * dx, r12 * dy, r13 * dz, header.quatern_x as f64],
            [r21 * dx, r22 * dy, r23 * dz, header.quatern_y as f64],
            [r31 * dx, r32 * dy, r33 * dz, header.quatern_z as f64],
        ]
    } else {
        let dx = header.pixdim[1] as f64;
        let dy = header.pixdim[2] as f64;
        let dz = header.pixdim[3] as f64;
        [
            [dx, 0.0, 0.0, 0.0],
            [0.0, dy, 0.0, 0.0],
            [0.0, 0.0, dz, 0.0],
        ]
    }
}

/// Split an affine into origin, spacing (column norms) and direction cosines.
fn decompose_affine(affine: &[[f64; 4]; 3]) -> (Point3, Spacing3, Direction3) {
    let origin = Point3::new(affine[0][3], affine[1][3], affine[2][3]);

    let column = |c: usize| Vector3::new(affine[0][c], affine[1][c], affine[2][c]);
    let fallback = [Vector3::x(), Vector3::y(), Vector3::z()];

    let mut spacing = Spacing3::zeros();
    let mut columns = [Vector3::zeros(); 3];
    for c in 0..3 {
        let col = column(c);
        let norm = col.norm();
        if norm > 1e-9 {
            spacing[c] = norm;
            columns[c] = col / norm;
        } else {
            spacing[c] = 1.0;
            columns[c] = fallback[c];
        }
    }

    let direction = Direction3(Matrix3::from_columns(&columns));
    (origin, spacing, direction)
}

fn geometry_header(geometry: &GridGeometry) -> NiftiHeader {
    let m = geometry.direction.matrix();
    let s = geometry.spacing;
    let o = geometry.origin;
    let srow = |r: usize, offset: f64| {
        [
            (m[(r, 0)] * s.x) as f32,
            (m[(r, 1)] * s.y) as f32,
            (m[(r, 2)] * s.z) as f32,
            offset as f32,
        ]
    };

    let mut header = NiftiHeader::default();
    header.sform_code = XFORM_SCANNER_ANAT;
    header.qform_code = 0;
    header.srow_x = srow(0, o.x);
    header.srow_y = srow(1, o.y);
    header.srow_z = srow(2, o.z);
    header.pixdim = [1.0, s.x as f32, s.y as f32, s.z as f32, 1.0, 1.0, 1.0, 1.0];
    header.xyzt_units = UNITS_MM;
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    header
}
