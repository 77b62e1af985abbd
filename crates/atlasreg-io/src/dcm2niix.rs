//! DICOM series discovery and conversion through the external `dcm2niix` tool.
//!
//! Every immediate subdirectory of an input root is treated as one series.
//! The converter names its output after the series directory.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;

use atlasreg_core::{PipelineError, Result};

/// Number of trailing stderr lines kept in a conversion error.
const STDERR_TAIL_LINES: usize = 8;

/// Files of an output directory with their modification times.
type DirSnapshot = BTreeMap<PathBuf, Option<SystemTime>>;

/// A directory holding the DICOM files of one series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeriesDir {
    /// Directory name, reused as the output file stem.
    pub name: String,
    pub path: PathBuf,
}

impl SeriesDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self { name, path }
    }
}

/// List the series directories directly below `base`, sorted by name.
///
/// Regular files are ignored. Fails with [`PipelineError::Io`] when `base`
/// cannot be read.
pub fn discover_series<P: AsRef<Path>>(base: P) -> Result<Vec<SeriesDir>> {
    let base = base.as_ref();
    let entries = fs::read_dir(base).map_err(|e| PipelineError::io(base, e))?;

    let mut series: Vec<SeriesDir> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .map(SeriesDir::new)
        .collect();
    series.sort();

    tracing::debug!(base = %base.display(), count = series.len(), "discovered DICOM series");
    Ok(series)
}

/// Converts one DICOM series into a NIfTI file.
pub trait SeriesConverter: Send + Sync {
    /// Convert `series` into `output_dir` and return the written file.
    fn convert(&self, series: &SeriesDir, output_dir: &Path) -> Result<PathBuf>;
}

/// Invocation settings for the `dcm2niix` executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dcm2Niix {
    pub executable: PathBuf,
    /// Emit `.nii.gz` instead of `.nii`.
    pub compress: bool,
}

impl Default for Dcm2Niix {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("dcm2niix"),
            compress: true,
        }
    }
}

impl Dcm2Niix {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn output_extension(&self) -> &'static str {
        if self.compress {
            "nii.gz"
        } else {
            "nii"
        }
    }

    /// Path the converter is expected to write for `series`.
    pub fn expected_output(&self, series: &SeriesDir, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.{}", series.name, self.output_extension()))
    }

    fn command(&self, series: &SeriesDir, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-z")
            .arg(if self.compress { "y" } else { "n" })
            .arg("-f")
            .arg(&series.name)
            .arg("-o")
            .arg(output_dir)
            .arg(&series.path);
        cmd
    }

    /// True for `<name>.<ext>` and for the suffixed `<name>_<suffix>.<ext>`
    /// files `dcm2niix` writes for echoes, phase maps and similar.
    fn is_output_name(&self, series: &SeriesDir, file_name: &str) -> bool {
        let Some(stem) = file_name.strip_suffix(&format!(".{}", self.output_extension())) else {
            return false;
        };
        match stem.strip_prefix(series.name.as_str()) {
            Some("") => true,
            Some(rest) => rest.len() > 1 && rest.starts_with('_'),
            None => false,
        }
    }

    /// Locate the converter output among the files created or rewritten since
    /// `before` was taken. The exact name wins over suffixed variants.
    fn find_output(&self, series: &SeriesDir, output_dir: &Path, before: &DirSnapshot) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = snapshot(output_dir)
            .into_iter()
            .filter(|(path, modified)| before.get(path) != Some(modified))
            .map(|(path, _)| path)
            .filter(|path| {
                path.file_name()
                    .is_some_and(|n| self.is_output_name(series, &n.to_string_lossy()))
            })
            .collect();

        let expected = self.expected_output(series, output_dir);
        if candidates.contains(&expected) {
            return Some(expected);
        }
        candidates.sort();
        candidates.into_iter().next()
    }
}

fn snapshot(dir: &Path) -> DirSnapshot {
    let Ok(entries) = fs::read_dir(dir) else {
        return DirSnapshot::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            meta.is_file().then(|| (e.path(), meta.modified().ok()))
        })
        .collect()
}

impl SeriesConverter for Dcm2Niix {
    /// Run `dcm2niix -z y|n -f <name> -o <output_dir> <series_dir>`.
    ///
    /// # Errors
    /// * [`PipelineError::Io`] if the executable cannot be started
    /// * [`PipelineError::Conversion`] on a non-zero exit or a missing output file
    fn convert(&self, series: &SeriesDir, output_dir: &Path) -> Result<PathBuf> {
        tracing::debug!(series = %series.name, input = %series.path.display(), "running dcm2niix");

        let before = snapshot(output_dir);
        let output = self
            .command(series, output_dir)
            .output()
            .map_err(|e| PipelineError::io(&self.executable, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = tail_lines(&stderr, STDERR_TAIL_LINES);
            let reason = if tail.is_empty() {
                format!("{} exited with {}", self.executable.display(), output.status)
            } else {
                format!("{} exited with {}: {}", self.executable.display(), output.status, tail)
            };
            return Err(PipelineError::conversion(&series.name, reason));
        }

        self.find_output(series, output_dir, &before).ok_or_else(|| {
            PipelineError::conversion(
                &series.name,
                format!(
                    "converter reported success but {} was not written",
                    self.expected_output(series, output_dir).display()
                ),
            )
        })
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join(" | ")
}

/// True when the converter executable itself could not be found.
pub fn is_missing_executable(err: &PipelineError) -> bool {
    matches!(err, PipelineError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
}
