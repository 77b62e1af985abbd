//! Registration jobs and their outcomes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use atlasreg_core::PipelineError;
use chrono::{DateTime, Local};
use thiserror::Error;

use crate::engine::Interpolation;
use crate::stage::StageConfig;

/// One fixed/moving pair to register, and what to do with the result.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationJob {
    pub name: String,
    /// Registration target; the output is sampled on this grid.
    pub fixed: PathBuf,
    pub moving: PathBuf,
    /// Volume to resample instead of `moving`; must share its grid.
    pub resample: Option<PathBuf>,
    pub output: PathBuf,
    pub interpolation: Interpolation,
    /// Where to persist the estimated transform, if anywhere.
    pub transform_dir: Option<PathBuf>,
    pub stages: Vec<StageConfig>,
}

impl RegistrationJob {
    pub fn new(
        name: impl Into<String>,
        fixed: impl Into<PathBuf>,
        moving: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        interpolation: Interpolation,
        stages: Vec<StageConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            fixed: fixed.into(),
            moving: moving.into(),
            resample: None,
            output: output.into(),
            interpolation,
            transform_dir: None,
            stages,
        }
    }

    pub fn with_resample(mut self, path: impl Into<PathBuf>) -> Self {
        self.resample = Some(path.into());
        self
    }

    pub fn with_transform_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transform_dir = Some(dir.into());
        self
    }

    /// The volume that gets resampled: `resample` if set, else `moving`.
    pub fn resample_source(&self) -> &Path {
        self.resample.as_deref().unwrap_or(&self.moving)
    }
}

/// A finished job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job: String,
    pub output: PathBuf,
    pub transform_dir: Option<PathBuf>,
    /// Time spent inside the registration engine.
    pub registration_time: Duration,
    pub total_time: Duration,
}

/// A failed job with enough context for the failure log.
#[derive(Debug, Error)]
#[error("Error during registration of job '{job}' ({} -> {}): {error}", moving.display(), fixed.display())]
pub struct JobFailure {
    pub job: String,
    pub fixed: PathBuf,
    pub moving: PathBuf,
    pub at: DateTime<Local>,
    #[source]
    pub error: PipelineError,
}

impl JobFailure {
    pub fn new(job: &RegistrationJob, error: PipelineError) -> Self {
        Self {
            job: job.name.clone(),
            fixed: job.fixed.clone(),
            moving: job.moving.clone(),
            at: Local::now(),
            error,
        }
    }
}
