//! Registration pipeline runner.
//!
//! Sits between callers and a [`RegistrationEngine`]: it checks inputs
//! before the engine sees them, turns engine failures into pipeline errors
//! and validates what the engine returns.

use std::path::Path;
use std::time::{Duration, Instant};

use atlasreg_core::{PipelineError, Result, Volume};
use atlasreg_io::{ensure_output_dir, read_nifti, write_nifti};
use burn::tensor::backend::Backend;

use crate::engine::{Interpolation, RegistrationEngine};
use crate::job::{JobFailure, JobOutcome, RegistrationJob};
use crate::stage::{is_coarse_to_fine, StageConfig};
use crate::transform::{CompositeTransform, TransformStage};
use crate::validation::{validate_resampled, ValidationConfig};

/// Drives one engine through registration and resampling.
#[derive(Debug, Clone)]
pub struct RegistrationRunner<E: RegistrationEngine> {
    engine: E,
    validation: ValidationConfig,
}

impl<E: RegistrationEngine> RegistrationRunner<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            validation: ValidationConfig::default(),
        }
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Register `moving` onto `fixed` through `stages`, in order.
    ///
    /// Returns the composite transform and the time spent in the engine.
    ///
    /// # Errors
    /// * [`PipelineError::Config`] for an empty stage list
    /// * [`PipelineError::Registration`] if the engine fails or returns the
    ///   wrong number of stage maps
    /// * [`PipelineError::Io`] if the engine executable is missing
    pub fn register<B: Backend>(
        &self,
        fixed: &Volume<B>,
        moving: &Volume<B>,
        stages: &[StageConfig],
    ) -> Result<(CompositeTransform, Duration)> {
        if stages.is_empty() {
            return Err(PipelineError::config("at least one registration stage is required"));
        }
        let methods: Vec<String> = stages.iter().map(|s| s.method.to_string()).collect();
        if !is_coarse_to_fine(stages) {
            tracing::warn!(
                stages = %methods.join(" -> "),
                "stages are not ordered coarse to fine (translation, rigid, affine, bspline)"
            );
        }

        tracing::info!(
            fixed = %fixed.geometry(),
            moving = %moving.geometry(),
            stages = %methods.join(" -> "),
            "starting registration"
        );

        let started = Instant::now();
        let maps = self
            .engine
            .register(fixed, moving, stages)
            .map_err(|e| engine_failure("registration", e))?;
        let elapsed = started.elapsed();

        if maps.len() != stages.len() {
            let err = PipelineError::registration(format!(
                "engine returned {} transform map(s) for {} stage(s)",
                maps.len(),
                stages.len()
            ));
            tracing::error!(error = %err, "registration engine returned an incomplete transform");
            return Err(err);
        }

        let transform_stages = stages
            .iter()
            .zip(maps)
            .map(|(stage, parameters)| TransformStage {
                method: stage.method,
                parameters,
            })
            .collect();
        let transform = CompositeTransform::new(transform_stages, fixed.geometry(), moving.geometry());

        tracing::info!(elapsed_s = elapsed.as_secs_f64(), "registration completed");
        Ok((transform, elapsed))
    }

    /// Resample `volume` through `transform` onto its fixed grid.
    ///
    /// # Errors
    /// * [`PipelineError::GridMismatch`] if `volume` is not on the moving
    ///   grid of `transform`; the engine is not called
    /// * [`PipelineError::Format`] if the output is off the fixed grid or
    ///   fails the checks for `interpolation`
    pub fn resample<B: Backend>(
        &self,
        volume: &Volume<B>,
        transform: &CompositeTransform,
        interpolation: Interpolation,
    ) -> Result<Volume<B>> {
        transform
            .moving_grid()
            .ensure_compatible(&volume.geometry(), "resampling source vs. transform moving grid")?;

        tracing::debug!(%interpolation, fixed_grid = %transform.fixed_grid(), "resampling");
        let output = self
            .engine
            .resample(volume, transform, interpolation)
            .map_err(|e| engine_failure("resampling", e))?;

        validate_resampled(
            volume,
            &output,
            transform.fixed_grid(),
            interpolation,
            transform.default_pixel_value(),
            &self.validation,
        )
        .inspect_err(|e| tracing::error!(error = %e, %interpolation, "resampled volume rejected"))?;

        Ok(output)
    }

    /// Run a full job: load, register, resample, write and optionally save
    /// the transform. The resample source is checked against the moving
    /// grid before the engine runs.
    pub fn run_job<B: Backend>(
        &self,
        job: &RegistrationJob,
        device: &B::Device,
    ) -> std::result::Result<JobOutcome, JobFailure> {
        self.execute::<B>(job, device).map_err(|error| {
            let failure = JobFailure::new(job, error);
            tracing::error!(job = %job.name, at = %failure.at, error = %failure.error, "registration job failed");
            failure
        })
    }

    fn execute<B: Backend>(&self, job: &RegistrationJob, device: &B::Device) -> Result<JobOutcome> {
        let started = Instant::now();
        tracing::info!(job = %job.name, fixed = %job.fixed.display(), moving = %job.moving.display(), "running job");

        let fixed = read_nifti::<B, _>(&job.fixed, device)?;
        let moving = read_nifti::<B, _>(&job.moving, device)?;
        let source = match &job.resample {
            Some(path) => {
                let source = read_nifti::<B, _>(path, device)?;
                moving
                    .geometry()
                    .ensure_compatible(&source.geometry(), "resampling source vs. moving volume")?;
                source
            }
            None => moving.clone(),
        };

        let (transform, registration_time) = self.register(&fixed, &moving, &job.stages)?;
        let result = self.resample(&source, &transform, job.interpolation)?;

        if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_output_dir(parent)?;
        }
        write_nifti(&job.output, &result)?;

        if let Some(dir) = &job.transform_dir {
            transform.save(dir)?;
        }

        let total_time = started.elapsed();
        tracing::info!(
            job = %job.name,
            output = %job.output.display(),
            registration_s = registration_time.as_secs_f64(),
            total_s = total_time.as_secs_f64(),
            "job completed"
        );

        Ok(JobOutcome {
            job: job.name.clone(),
            output: job.output.clone(),
            transform_dir: job.transform_dir.clone(),
            registration_time,
            total_time,
        })
    }

    /// Resample a volume file through `transform` and write the result.
    pub fn resample_file<B: Backend>(
        &self,
        volume_path: &Path,
        transform: &CompositeTransform,
        interpolation: Interpolation,
        output: &Path,
        device: &B::Device,
    ) -> Result<()> {
        let volume = read_nifti::<B, _>(volume_path, device)?;
        let result = self.resample(&volume, transform, interpolation)?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_output_dir(parent)?;
        }
        write_nifti(output, &result)
    }
}

/// Log an engine error and classify it. A missing executable stays `Io`.
fn engine_failure(operation: &str, error: PipelineError) -> PipelineError {
    tracing::error!(operation, error = %error, "registration engine failed");
    match error {
        PipelineError::Io { .. } | PipelineError::Registration(_) => error,
        other => PipelineError::registration(format!("{} failed: {}", operation, other)),
    }
}
