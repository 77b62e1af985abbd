//! Composite transform produced by a multi-stage registration.
//!
//! The per-stage maps are opaque engine output. The pipeline only relies on
//! the fixed grid (where resampled volumes land) and the moving grid (what a
//! volume must be sampled on to be resampled through the transform).

use std::fs;
use std::path::{Path, PathBuf};

use atlasreg_core::{GridGeometry, PipelineError, Result};
use serde::{Deserialize, Serialize};

use crate::engine::Interpolation;
use crate::parameter_map::ParameterMap;
use crate::stage::StageMethod;

/// File name of the JSON manifest written next to the parameter files.
pub const MANIFEST_FILE: &str = "transform.json";

/// elastix sentinel for the first transform in a chain.
const NO_INITIAL_TRANSFORM: &str = "NoInitialTransform";

/// Chain link keys. elastix 5 writes the singular form and still reads the
/// plural one used by 4.x.
const INITIAL_TRANSFORM_KEYS: [&str; 2] = ["InitialTransformParameterFileName", "InitialTransformParametersFileName"];

/// File name of the parameter file for stage `index`.
pub fn parameter_file_name(index: usize) -> String {
    format!("TransformParameters.{}.txt", index)
}

/// Estimated parameters of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformStage {
    pub method: StageMethod,
    pub parameters: ParameterMap,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    methods: Vec<StageMethod>,
    fixed_grid: GridGeometry,
    moving_grid: GridGeometry,
}

/// Ordered stage transforms plus the grids they connect.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeTransform {
    stages: Vec<TransformStage>,
    fixed_grid: GridGeometry,
    moving_grid: GridGeometry,
}

impl CompositeTransform {
    pub fn new(stages: Vec<TransformStage>, fixed_grid: GridGeometry, moving_grid: GridGeometry) -> Self {
        Self {
            stages,
            fixed_grid,
            moving_grid,
        }
    }

    pub fn stages(&self) -> &[TransformStage] {
        &self.stages
    }

    /// Grid of the registration target; resampled volumes land here.
    pub fn fixed_grid(&self) -> &GridGeometry {
        &self.fixed_grid
    }

    /// Grid a volume must share to be resampled through this transform.
    pub fn moving_grid(&self) -> &GridGeometry {
        &self.moving_grid
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Value written where the transform maps outside the moving volume.
    pub fn default_pixel_value(&self) -> f64 {
        self.stages
            .last()
            .and_then(|s| s.parameters.parsed("DefaultPixelValue"))
            .unwrap_or(0.0)
    }

    /// Write the stage maps as a linked elastix chain and return the last file.
    ///
    /// Stage `i` is written to `TransformParameters.<i>.txt` with its initial
    /// transform link pointing at stage `i - 1`. Links carried over from the
    /// engine run are replaced under both key spellings. With an interpolation
    /// every map also carries the matching resampling settings.
    pub fn write_chain(&self, dir: &Path, interpolation: Option<Interpolation>) -> Result<PathBuf> {
        if self.stages.is_empty() {
            return Err(PipelineError::registration("transform has no stages"));
        }

        let mut previous: Option<PathBuf> = None;
        for (index, stage) in self.stages.iter().enumerate() {
            let mut parameters = stage.parameters.clone();
            let initial = previous
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| NO_INITIAL_TRANSFORM.to_string());
            for key in INITIAL_TRANSFORM_KEYS {
                parameters.set_one(key, &initial);
            }

            if let Some(mode) = interpolation {
                mode.apply_to(&mut parameters);
                parameters.set_one("WriteResultImage", "true");
                parameters.set_one("ResultImageFormat", "nii");
                parameters.set_one("ResultImagePixelType", "float");
            }

            let path = dir.join(parameter_file_name(index));
            parameters.write_file(&path)?;
            previous = Some(path);
        }

        previous.ok_or_else(|| PipelineError::registration("transform has no stages"))
    }

    /// Persist to `dir` (created if absent): the parameter chain plus a manifest.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        self.write_chain(dir, None)?;

        let manifest = Manifest {
            methods: self.stages.iter().map(|s| s.method).collect(),
            fixed_grid: self.fixed_grid.clone(),
            moving_grid: self.moving_grid.clone(),
        };
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| PipelineError::format(format!("Failed to encode transform manifest: {}", e)))?;
        let manifest_path = dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, json).map_err(|e| PipelineError::io(&manifest_path, e))?;

        tracing::debug!(dir = %dir.display(), stages = self.stages.len(), "saved transform");
        Ok(())
    }

    /// Load a transform written by [`CompositeTransform::save`].
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest_path = dir.join(MANIFEST_FILE);
        let json = fs::read_to_string(&manifest_path).map_err(|e| PipelineError::io(&manifest_path, e))?;
        let manifest: Manifest = serde_json::from_str(&json).map_err(|e| {
            PipelineError::format(format!("{} is not a transform manifest: {}", manifest_path.display(), e))
        })?;

        if manifest.methods.is_empty() {
            return Err(PipelineError::format(format!(
                "{} lists no transform stages",
                manifest_path.display()
            )));
        }

        let stages = manifest
            .methods
            .iter()
            .enumerate()
            .map(|(index, &method)| {
                let parameters = ParameterMap::read_file(dir.join(parameter_file_name(index)))?;
                Ok(TransformStage { method, parameters })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(stages, manifest.fixed_grid, manifest.moving_grid))
    }
}
