#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use atlasreg_core::{Direction3, GridGeometry, PipelineError, Point3, Result, Spacing3, Volume};
use atlasreg_registration::{CompositeTransform, Interpolation, ParameterMap, RegistrationEngine, StageConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use burn_ndarray::NdArray;

pub type TestBackend = NdArray<f32>;

/// How the fake engine answers a resampling request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResampleMode {
    /// Identity transform, honouring the requested interpolation.
    Identity,
    /// Returns the source grid instead of the fixed grid.
    WrongGrid,
    /// Averages neighbouring voxels whatever the interpolation.
    AlwaysBlend,
}

/// In-process engine standing in for elastix: the estimated transform is
/// always the identity.
pub struct FakeEngine {
    pub resample_mode: ResampleMode,
    /// Number of maps returned by `register`; one per stage when `None`.
    pub map_count: Option<usize>,
    /// Error returned by `register`, if any.
    pub register_error: Option<fn() -> PipelineError>,
    pub register_calls: AtomicUsize,
    pub resample_calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new(resample_mode: ResampleMode) -> Self {
        Self {
            resample_mode,
            map_count: None,
            register_error: None,
            register_calls: AtomicUsize::new(0),
            resample_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: fn() -> PipelineError) -> Self {
        Self {
            register_error: Some(error),
            ..Self::new(ResampleMode::Identity)
        }
    }

    pub fn registrations(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    pub fn resamplings(&self) -> usize {
        self.resample_calls.load(Ordering::SeqCst)
    }
}

impl RegistrationEngine for FakeEngine {
    fn register<B: Backend>(
        &self,
        _fixed: &Volume<B>,
        _moving: &Volume<B>,
        stages: &[StageConfig],
    ) -> Result<Vec<ParameterMap>> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.register_error {
            return Err(error());
        }
        let count = self.map_count.unwrap_or(stages.len());
        Ok(stages
            .iter()
            .cycle()
            .take(count)
            .map(|stage| {
                let mut map = ParameterMap::new();
                map.set_one("Transform", stage.method.elastix_transform());
                map.set("TransformParameters", ["0", "0", "0"]);
                map.set_one("DefaultPixelValue", 0);
                map
            })
            .collect())
    }

    fn resample<B: Backend>(
        &self,
        volume: &Volume<B>,
        transform: &CompositeTransform,
        interpolation: Interpolation,
    ) -> Result<Volume<B>> {
        self.resample_calls.fetch_add(1, Ordering::SeqCst);
        match self.resample_mode {
            ResampleMode::Identity => Ok(resample_identity(volume, transform.fixed_grid(), interpolation)),
            ResampleMode::WrongGrid => Ok(volume.clone()),
            ResampleMode::AlwaysBlend => Ok(resample_identity(volume, transform.fixed_grid(), Interpolation::Linear)),
        }
    }
}

/// Identity resampling of `volume` onto `grid`; outside samples are 0.
pub fn resample_identity<B: Backend>(volume: &Volume<B>, grid: &GridGeometry, interpolation: Interpolation) -> Volume<B> {
    let src = volume.to_vec().unwrap();
    let [sz, sy, sx] = volume.shape();
    let src_grid = volume.geometry();
    let at = |x: usize, y: usize, z: usize| src[(z * sy + y) * sx + x];

    let [nz, ny, nx] = grid.shape;
    let mut out = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let p = grid.index_to_physical(&Point3::new(x as f64, y as f64, z as f64));
                let idx = src_grid.physical_to_index(&p).unwrap();
                let inside = idx.x >= 0.0
                    && idx.y >= 0.0
                    && idx.z >= 0.0
                    && idx.x <= (sx - 1) as f64
                    && idx.y <= (sy - 1) as f64
                    && idx.z <= (sz - 1) as f64;
                if !inside {
                    out.push(0.0);
                    continue;
                }
                let value = match interpolation {
                    Interpolation::NearestNeighbor => {
                        at(idx.x.round() as usize, idx.y.round() as usize, idx.z.round() as usize)
                    }
                    _ => {
                        let (x0, y0, z0) = (idx.x.floor() as usize, idx.y.floor() as usize, idx.z.floor() as usize);
                        let (x1, y1, z1) = ((x0 + 1).min(sx - 1), (y0 + 1).min(sy - 1), (z0 + 1).min(sz - 1));
                        let (fx, fy, fz) = (
                            (idx.x - x0 as f64) as f32,
                            (idx.y - y0 as f64) as f32,
                            (idx.z - z0 as f64) as f32,
                        );
                        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
                        let c00 = lerp(at(x0, y0, z0), at(x1, y0, z0), fx);
                        let c10 = lerp(at(x0, y1, z0), at(x1, y1, z0), fx);
                        let c01 = lerp(at(x0, y0, z1), at(x1, y0, z1), fx);
                        let c11 = lerp(at(x0, y1, z1), at(x1, y1, z1), fx);
                        lerp(lerp(c00, c10, fy), lerp(c01, c11, fy), fz)
                    }
                };
                out.push(value);
            }
        }
    }

    let device = volume.data().device();
    let data = Tensor::<B, 3>::from_data(TensorData::new(out, Shape::new(grid.shape)), &device);
    Volume::from_geometry(data, grid).unwrap()
}

/// Volume whose voxel values come from `f(x, y, z)`.
pub fn make_volume(
    shape: [usize; 3],
    spacing: Spacing3,
    origin: Point3,
    f: impl Fn(usize, usize, usize) -> f32,
) -> Volume<TestBackend> {
    let [nz, ny, nx] = shape;
    let mut values = Vec::with_capacity(nx * ny * nz);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                values.push(f(x, y, z));
            }
        }
    }
    let device = Default::default();
    let data = Tensor::<TestBackend, 3>::from_data(TensorData::new(values, Shape::new(shape)), &device);
    Volume::new(data, origin, spacing, Direction3::identity())
}

/// A 12³ label atlas with 2 mm voxels: eight octant labels 1..=8.
pub fn label_atlas() -> Volume<TestBackend> {
    make_volume([12, 12, 12], Spacing3::new(2.0, 2.0, 2.0), Point3::origin(), |x, y, z| {
        (1 + (x / 6) + 2 * (y / 6) + 4 * (z / 6)) as f32
    })
}

/// A 10x14x16 intensity target with 1.5 mm voxels, smaller than the atlas.
pub fn intensity_target() -> Volume<TestBackend> {
    make_volume([10, 14, 16], Spacing3::new(1.5, 1.5, 1.5), Point3::new(1.0, 1.0, 1.0), |x, y, z| {
        (x + y + z) as f32 * 10.0
    })
}
