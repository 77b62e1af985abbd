//! Error types shared by every stage of the pipeline.
//!
//! Each variant corresponds to one failure class: file access, file format
//! or geometry, configuration, registration engine and DICOM conversion.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A file or executable is missing or unreadable.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file exists but is not the expected volumetric format.
    #[error("Format error: {0}")]
    Format(String),

    /// Two volumes that must share a sampling grid do not.
    #[error("Grid mismatch in {context}: expected {expected}, got {actual}")]
    GridMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    /// Unknown stage method or invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The registration engine reported an error or did not converge.
    #[error("Registration failure: {0}")]
    Registration(String),

    /// The external DICOM converter failed for one series.
    #[error("Conversion of series '{series}' failed: {reason}")]
    Conversion { series: String, reason: String },
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Create an I/O error bound to a path.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a registration failure.
    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }

    /// Create a conversion failure for a named series.
    pub fn conversion(series: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conversion {
            series: series.into(),
            reason: reason.into(),
        }
    }

    /// True for both plain format errors and grid mismatches.
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_) | Self::GridMismatch { .. })
    }

    /// Short, stable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::Format(_) | Self::GridMismatch { .. } => "format",
            Self::Config(_) => "config",
            Self::Registration(_) => "registration",
            Self::Conversion { .. } => "conversion",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PipelineError::config("unknown stage 'warp'");
        assert!(matches!(err, PipelineError::Config(_)));
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_error_display() {
        let err = PipelineError::format("not a NIfTI file");
        assert_eq!(err.to_string(), "Format error: not a NIfTI file");
    }

    #[test]
    fn test_grid_mismatch_is_format() {
        let err = PipelineError::GridMismatch {
            context: "mask".to_string(),
            expected: "10x10x10".to_string(),
            actual: "5x5x5".to_string(),
        };
        assert!(err.is_format());
        let err_str = err.to_string();
        assert!(err_str.contains("expected 10x10x10"));
        assert!(err_str.contains("got 5x5x5"));
    }

    #[test]
    fn test_io_error_names_path() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = PipelineError::io("/data/t1.nii.gz", source);
        assert!(err.to_string().contains("/data/t1.nii.gz"));
        assert!(!err.is_format());
    }
}
