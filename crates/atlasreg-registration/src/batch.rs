//! Batch drivers with per-item failure isolation.
//!
//! A failing item is logged (tracing and the failure log) and the batch moves
//! on. Only problems that affect the whole batch, such as an unreadable input
//! root, are returned as errors.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use atlasreg_core::{PipelineError, Result};
use atlasreg_io::{discover_series, ensure_output_dir, is_missing_executable, SeriesConverter};
use burn::tensor::backend::Backend;
use rayon::prelude::*;

use crate::engine::RegistrationEngine;
use crate::failure_log::FailureLog;
use crate::job::RegistrationJob;
use crate::progress::ProgressTracker;
use crate::runner::RegistrationRunner;

/// Summary of a finished batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Names of the failed items, sorted.
    pub failures: Vec<String>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Run `task` on every item, isolating failures.
///
/// `task` returns the failure-log message on error. With `workers > 1` items
/// run on a dedicated rayon pool of that size.
fn run_isolated<T, N, F>(
    items: &[T],
    workers: usize,
    name: N,
    log: &FailureLog,
    progress: &ProgressTracker,
    task: F,
) -> Result<BatchReport>
where
    T: Sync,
    N: Fn(&T) -> String + Sync,
    F: Fn(&T) -> std::result::Result<(), String> + Sync,
{
    let started = Instant::now();
    let succeeded = AtomicUsize::new(0);
    let failures = Mutex::new(Vec::new());
    progress.start(items.len());

    let process = |item: &T| {
        let item_name = name(item);
        match task(item) {
            Ok(()) => {
                succeeded.fetch_add(1, Ordering::SeqCst);
                progress.item_finished(&item_name, None);
            }
            Err(message) => {
                if let Err(e) = log.record(&message) {
                    tracing::error!(error = %e, "could not write to the failure log");
                }
                progress.item_finished(&item_name, Some(&message));
                failures
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(item_name);
            }
        }
    };

    if workers > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| PipelineError::config(format!("cannot start {} workers: {}", workers, e)))?;
        pool.install(|| items.par_iter().for_each(process));
    } else {
        items.iter().for_each(process);
    }

    progress.complete();

    let mut failures = failures.into_inner().unwrap_or_else(PoisonError::into_inner);
    failures.sort();
    Ok(BatchReport {
        succeeded: succeeded.into_inner(),
        failed: failures.len(),
        failures,
        elapsed: started.elapsed(),
    })
}

/// Convert every series directory below `input_root` into `output_root`.
///
/// The output directory is created first. Series that fail to convert are
/// recorded in `log` and skipped. A converter that cannot be started is
/// reported once as an installation problem; its series still fail one by one.
///
/// # Errors
/// [`PipelineError::Io`] if `input_root` cannot be listed or `output_root`
/// cannot be created.
pub fn convert_all<C: SeriesConverter>(
    converter: &C,
    input_root: &Path,
    output_root: &Path,
    log: &FailureLog,
    progress: &ProgressTracker,
    workers: usize,
) -> Result<BatchReport> {
    ensure_output_dir(output_root)?;
    let series = discover_series(input_root)?;
    tracing::info!(
        input = %input_root.display(),
        output = %output_root.display(),
        count = series.len(),
        "converting DICOM series"
    );

    let missing_reported = AtomicBool::new(false);
    let report = run_isolated(
        &series,
        workers,
        |s| s.name.clone(),
        log,
        progress,
        |s| {
            converter
                .convert(s, output_root)
                .map(|path| tracing::debug!(series = %s.name, output = %path.display(), "converted"))
                .map_err(|e| {
                    if is_missing_executable(&e) && !missing_reported.swap(true, Ordering::SeqCst) {
                        tracing::error!(error = %e, "DICOM converter is not installed or not on PATH");
                    }
                    format!("Failed to convert {} to NIfTI: {}", s.path.display(), e)
                })
        },
    )?;

    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_s = report.elapsed.as_secs_f64(),
        "conversion finished"
    );
    Ok(report)
}

/// Run every job through `runner`, isolating failures.
pub fn register_all<B, E>(
    runner: &RegistrationRunner<E>,
    jobs: &[RegistrationJob],
    device: &B::Device,
    log: &FailureLog,
    progress: &ProgressTracker,
    workers: usize,
) -> Result<BatchReport>
where
    B: Backend,
    E: RegistrationEngine + Sync,
{
    tracing::info!(count = jobs.len(), workers, "running registration jobs");

    let report = run_isolated(
        jobs,
        workers,
        |job| job.name.clone(),
        log,
        progress,
        |job| runner.run_job::<B>(job, device).map(|_| ()).map_err(|f| f.to_string()),
    )?;

    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_s = report.elapsed.as_secs_f64(),
        "registration batch finished"
    );
    Ok(report)
}
