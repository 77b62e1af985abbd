//! Pipeline configuration file.
//!
//! ```toml
//! [paths]
//! input_root = "/data/dicom"
//! output_root = "/data/nifti"
//! atlas = "/data/atlas/difumo.nii"
//!
//! [engine]
//! threads = 8
//!
//! [[stages]]
//! method = "translation"
//! [[stages]]
//! method = "rigid"
//! max_iterations = 512
//!
//! [[jobs]]
//! name = "atlas_to_tof"
//! fixed = "tof.nii.gz"
//! output = "registered/atlas_to_tof.nii.gz"
//! interpolation = "nearest"
//! ```
//!
//! Relative job paths resolve against `paths.output_root`. A job that omits
//! `fixed` or `moving` uses `paths.atlas` in its place.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use atlasreg_core::{PipelineError, Result};
use atlasreg_io::Dcm2Niix;
use serde::{Deserialize, Serialize};

use crate::elastix::ElastixEngine;
use crate::engine::Interpolation;
use crate::job::RegistrationJob;
use crate::parameter_map::ParameterMap;
use crate::stage::StageConfig;

/// Whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub stages: Vec<StageEntry>,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// DICOM series root for conversion.
    pub input_root: Option<PathBuf>,
    /// Conversion output; base for relative job paths.
    pub output_root: Option<PathBuf>,
    /// Substituted for an omitted job `fixed` or `moving`; relative to
    /// `output_root` like the job paths.
    pub atlas: Option<PathBuf>,
    #[serde(default = "default_registration_log")]
    pub failure_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_root: None,
            output_root: None,
            atlas: None,
            failure_log: default_registration_log(),
        }
    }
}

fn default_registration_log() -> PathBuf {
    PathBuf::from("registration_errors.log")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConverterConfig {
    #[serde(default = "default_converter")]
    pub executable: PathBuf,
    #[serde(default = "default_true")]
    pub compress: bool,
    #[serde(default = "default_conversion_log")]
    pub failure_log: PathBuf,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            executable: default_converter(),
            compress: true,
            failure_log: default_conversion_log(),
        }
    }
}

fn default_converter() -> PathBuf {
    PathBuf::from("dcm2niix")
}

fn default_conversion_log() -> PathBuf {
    PathBuf::from("conversion_errors.log")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_elastix")]
    pub elastix: PathBuf,
    #[serde(default = "default_transformix")]
    pub transformix: PathBuf,
    pub threads: Option<usize>,
    pub work_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            elastix: default_elastix(),
            transformix: default_transformix(),
            threads: None,
            work_dir: None,
        }
    }
}

fn default_elastix() -> PathBuf {
    PathBuf::from("elastix")
}

fn default_transformix() -> PathBuf {
    PathBuf::from("transformix")
}

/// A parameter override: one value or a list, strings or numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    One(Scalar),
    Many(Vec<Scalar>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn render(&self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s.clone(),
        }
    }
}

impl ParameterValue {
    fn values(&self) -> Vec<String> {
        match self {
            ParameterValue::One(s) => vec![s.render()],
            ParameterValue::Many(v) => v.iter().map(Scalar::render).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageEntry {
    pub method: String,
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterValue>,
}

impl StageEntry {
    pub fn to_stage_config(&self) -> Result<StageConfig> {
        let mut stage = StageConfig::from_name(&self.method)?;
        if let Some(iterations) = self.max_iterations {
            stage = stage.with_max_iterations(iterations);
        }
        let overrides: ParameterMap = self
            .parameters
            .iter()
            .map(|(key, value)| (key.clone(), value.values()))
            .collect();
        Ok(stage.with_parameters(&overrides))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Items processed in parallel; 1 runs sequentially.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobEntry {
    pub name: String,
    pub fixed: Option<PathBuf>,
    pub moving: Option<PathBuf>,
    pub resample: Option<PathBuf>,
    pub output: PathBuf,
    /// `nearest`, `linear` or `bspline`; always required.
    pub interpolation: String,
    pub bspline_order: Option<u8>,
    pub transform_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    /// * [`PipelineError::Io`] if the file cannot be read
    /// * [`PipelineError::Config`] if it does not parse or validate
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::load_from_str(&content).map_err(|e| match e {
            PipelineError::Config(msg) => PipelineError::config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse and validate TOML text.
    pub fn load_from_str(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            toml::from_str(content).map_err(|e| PipelineError::config(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize back to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PipelineError::config(format!("TOML serialize error: {e}")))
    }

    /// Check everything that can be checked without touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        let stages = self.stage_configs()?;
        if !self.jobs.is_empty() && stages.is_empty() {
            return Err(PipelineError::config("jobs are configured but no [[stages]] are"));
        }
        if self.batch.workers == 0 {
            return Err(PipelineError::config("batch.workers must be at least 1"));
        }

        let mut seen = HashSet::new();
        for (idx, job) in self.jobs.iter().enumerate() {
            if job.name.trim().is_empty() {
                return Err(PipelineError::config(format!("jobs[{}]: name cannot be empty", idx)));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(PipelineError::config(format!("jobs[{}]: duplicate job name '{}'", idx, job.name)));
            }
            if job.fixed.is_none() && job.moving.is_none() {
                return Err(PipelineError::config(format!(
                    "job '{}': at least one of fixed and moving is required",
                    job.name
                )));
            }
            if (job.fixed.is_none() || job.moving.is_none()) && self.paths.atlas.is_none() {
                return Err(PipelineError::config(format!(
                    "job '{}' omits an input but paths.atlas is not set",
                    job.name
                )));
            }
            Interpolation::from_name(&job.interpolation, job.bspline_order).map_err(|e| match e {
                PipelineError::Config(msg) => PipelineError::config(format!("job '{}': {}", job.name, msg)),
                other => other,
            })?;
        }
        Ok(())
    }

    pub fn stage_configs(&self) -> Result<Vec<StageConfig>> {
        self.stages.iter().map(StageEntry::to_stage_config).collect()
    }

    /// Resolve `path` against `paths.output_root` when relative.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.paths.output_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Jobs with atlas substitution, resolved paths and the shared stages.
    pub fn registration_jobs(&self) -> Result<Vec<RegistrationJob>> {
        let stages = self.stage_configs()?;
        self.jobs
            .iter()
            .map(|entry| {
                let input = |path: &Option<PathBuf>| -> Result<PathBuf> {
                    match (path, &self.paths.atlas) {
                        (Some(p), _) => Ok(self.resolve(p)),
                        (None, Some(atlas)) => Ok(self.resolve(atlas)),
                        (None, None) => Err(PipelineError::config(format!(
                            "job '{}' omits an input but paths.atlas is not set",
                            entry.name
                        ))),
                    }
                };

                let interpolation = Interpolation::from_name(&entry.interpolation, entry.bspline_order)?;
                let mut job = RegistrationJob::new(
                    entry.name.clone(),
                    input(&entry.fixed)?,
                    input(&entry.moving)?,
                    self.resolve(&entry.output),
                    interpolation,
                    stages.clone(),
                );
                job.resample = entry.resample.as_deref().map(|p| self.resolve(p));
                job.transform_dir = entry.transform_dir.as_deref().map(|p| self.resolve(p));
                Ok(job)
            })
            .collect()
    }

    pub fn converter(&self) -> Dcm2Niix {
        Dcm2Niix::new(&self.converter.executable).with_compression(self.converter.compress)
    }

    pub fn engine(&self) -> ElastixEngine {
        let mut engine = ElastixEngine::new(&self.engine.elastix, &self.engine.transformix);
        engine.threads = self.engine.threads;
        engine.work_dir = self.engine.work_dir.clone();
        engine
    }
}
