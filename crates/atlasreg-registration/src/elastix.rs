//! [`RegistrationEngine`] backed by the `elastix` and `transformix` executables.
//!
//! Every call works in its own scratch directory: inputs are written as
//! NIfTI, parameter files are rendered from the stage maps and the tool
//! output is read back. The scratch directory is removed afterwards.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;

use atlasreg_core::{PipelineError, Result, Volume};
use atlasreg_io::{read_nifti, write_nifti};
use burn::tensor::backend::Backend;
use tempfile::TempDir;

use crate::engine::{Interpolation, RegistrationEngine};
use crate::parameter_map::ParameterMap;
use crate::stage::StageConfig;
use crate::transform::{parameter_file_name, CompositeTransform};

/// Number of trailing log lines quoted in an engine failure.
const LOG_TAIL_LINES: usize = 12;

/// Subprocess registration engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElastixEngine {
    pub elastix: PathBuf,
    pub transformix: PathBuf,
    /// Passed as `-threads`; the tools pick their own default otherwise.
    pub threads: Option<usize>,
    /// Parent of the scratch directories; the system temp dir if unset.
    pub work_dir: Option<PathBuf>,
}

impl Default for ElastixEngine {
    fn default() -> Self {
        Self {
            elastix: PathBuf::from("elastix"),
            transformix: PathBuf::from("transformix"),
            threads: None,
            work_dir: None,
        }
    }
}

impl ElastixEngine {
    pub fn new(elastix: impl Into<PathBuf>, transformix: impl Into<PathBuf>) -> Self {
        Self {
            elastix: elastix.into(),
            transformix: transformix.into(),
            ..Self::default()
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    fn scratch(&self, prefix: &str) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        match &self.work_dir {
            Some(dir) => builder.tempdir_in(dir).map_err(|e| PipelineError::io(dir, e)),
            None => builder
                .tempdir()
                .map_err(|e| PipelineError::io(std::env::temp_dir(), e)),
        }
    }

    fn thread_args(&self, cmd: &mut Command) {
        if let Some(threads) = self.threads {
            cmd.arg("-threads").arg(threads.to_string());
        }
    }

    /// Run a tool and turn a non-zero exit into a registration failure
    /// quoting the tail of its log.
    fn run(&self, mut cmd: Command, executable: &Path, log_file: &Path) -> Result<()> {
        tracing::debug!(command = ?cmd, "starting engine");
        let output = cmd.output().map_err(|e| PipelineError::io(executable, e))?;
        if output.status.success() {
            return Ok(());
        }
        Err(PipelineError::registration(format!(
            "{} exited with {}: {}",
            executable.display(),
            output.status,
            failure_detail(&output, log_file)
        )))
    }
}

impl RegistrationEngine for ElastixEngine {
    fn register<B: Backend>(
        &self,
        fixed: &Volume<B>,
        moving: &Volume<B>,
        stages: &[StageConfig],
    ) -> Result<Vec<ParameterMap>> {
        let scratch = self.scratch("atlasreg-elastix-")?;
        let dir = scratch.path();

        let fixed_path = dir.join("fixed.nii");
        let moving_path = dir.join("moving.nii");
        write_nifti(&fixed_path, fixed)?;
        write_nifti(&moving_path, moving)?;

        let mut cmd = Command::new(&self.elastix);
        cmd.arg("-f")
            .arg(&fixed_path)
            .arg("-m")
            .arg(&moving_path)
            .arg("-out")
            .arg(dir);

        for (index, stage) in stages.iter().enumerate() {
            let mut parameters = stage.parameters.clone();
            // The pipeline resamples explicitly, so skip elastix's own result image.
            parameters.set_one("WriteResultImage", "false");
            let path = dir.join(format!("p{}.txt", index));
            parameters.write_file(&path)?;
            cmd.arg("-p").arg(&path);
        }
        self.thread_args(&mut cmd);

        let started = Instant::now();
        self.run(cmd, &self.elastix, &dir.join("elastix.log"))?;

        let maps = (0..stages.len())
            .map(|index| {
                let path = dir.join(parameter_file_name(index));
                if !path.is_file() {
                    return Err(PipelineError::registration(format!(
                        "elastix finished but did not write {}",
                        parameter_file_name(index)
                    )));
                }
                ParameterMap::read_file(&path)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            stages = stages.len(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "elastix finished"
        );
        Ok(maps)
    }

    fn resample<B: Backend>(
        &self,
        volume: &Volume<B>,
        transform: &CompositeTransform,
        interpolation: Interpolation,
    ) -> Result<Volume<B>> {
        let scratch = self.scratch("atlasreg-transformix-")?;
        let dir = scratch.path();

        let input_path = dir.join("input.nii");
        write_nifti(&input_path, volume)?;
        let last = transform.write_chain(dir, Some(interpolation))?;

        let mut cmd = Command::new(&self.transformix);
        cmd.arg("-in")
            .arg(&input_path)
            .arg("-out")
            .arg(dir)
            .arg("-tp")
            .arg(&last);
        self.thread_args(&mut cmd);

        self.run(cmd, &self.transformix, &dir.join("transformix.log"))?;

        let result_path = dir.join("result.nii");
        if !result_path.is_file() {
            return Err(PipelineError::registration(format!(
                "transformix finished but did not write {}",
                result_path.display()
            )));
        }
        let device = volume.data().device();
        read_nifti::<B, _>(&result_path, &device)
    }
}

fn failure_detail(output: &Output, log_file: &Path) -> String {
    let log = match fs::read_to_string(log_file) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            tracing::warn!(path = %log_file.display(), error = %e, "could not read engine log");
            String::new()
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = [log.as_str(), stderr.as_ref(), stdout.as_ref()]
        .into_iter()
        .map(|text| tail(text, LOG_TAIL_LINES))
        .find(|t| !t.is_empty())
        .unwrap_or_else(|| "no engine output".to_string());
    detail
}

fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim_end).filter(|l| !l.is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasreg_core::{Direction3, Point3, Spacing3};
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use tempfile::tempdir;

    type TestBackend = NdArray<f32>;

    fn small_volume() -> Volume<TestBackend> {
        let device = Default::default();
        Volume::new(
            Tensor::<TestBackend, 3>::ones([4, 4, 4], &device),
            Point3::origin(),
            Spacing3::new(1.0, 1.0, 1.0),
            Direction3::identity(),
        )
    }

    #[test]
    fn test_missing_elastix_is_io_error() {
        let tools = tempdir().unwrap();
        let engine = ElastixEngine::new(
            tools.path().join("elastix-not-installed"),
            tools.path().join("transformix-not-installed"),
        )
        .with_work_dir(tools.path());

        let volume = small_volume();
        let stages = crate::stage::default_stages();
        let err = engine.register(&volume, &volume, &stages).unwrap_err();
        match err {
            PipelineError::Io { path, source } => {
                assert_eq!(path, tools.path().join("elastix-not-installed"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[test]
    fn test_scratch_dirs_are_removed() {
        let work = tempdir().unwrap();
        let engine = ElastixEngine::new(work.path().join("nope"), work.path().join("nope")).with_work_dir(work.path());

        let volume = small_volume();
        let _ = engine.register(&volume, &volume, &crate::stage::default_stages());
        assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_tail_prefers_last_lines() {
        let text = "Reading images\n\nResolution 0\nERROR: too many samples map outside moving image buffer\n";
        assert_eq!(
            tail(text, 2),
            "Resolution 0\nERROR: too many samples map outside moving image buffer"
        );
    }
}
