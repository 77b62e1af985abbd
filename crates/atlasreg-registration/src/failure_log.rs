//! Append-only log of failed batch items.
//!
//! One line per failure: `YYYY-MM-DD HH:MM:SS,mmm - <message>`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use atlasreg_core::{PipelineError, Result};
use chrono::{DateTime, Local};

/// Timestamp layout of a log line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

pub fn format_line(at: &DateTime<Local>, message: &str) -> String {
    // Keep one failure per line even when the error text spans several.
    let message = message.replace(['\r', '\n'], " ");
    format!("{} - {}\n", at.format(TIMESTAMP_FORMAT), message)
}

/// Shared failure log; safe to write from several workers.
#[derive(Debug)]
pub struct FailureLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FailureLog {
    /// Open `path` for appending, creating it and its directory if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PipelineError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.
    pub fn record(&self, message: &str) -> Result<()> {
        let line = format_line(&Local::now(), message);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| PipelineError::io(&self.path, e))
    }
}
