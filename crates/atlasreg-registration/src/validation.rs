//! Validation of resampled output.
//!
//! The engine is trusted to register, not to honour every request. These
//! checks confirm that what comes back lands on the right grid and that the
//! chosen interpolation did what it promises.

use atlasreg_core::{GridGeometry, PipelineError, Result, Volume};
use burn::tensor::backend::Backend;

use crate::engine::Interpolation;

/// Largest number of offending labels quoted in an error message.
const MAX_REPORTED_LABELS: usize = 5;

/// Validation configuration.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Tolerance of the range check, relative to the input intensity range.
    pub range_tolerance: f64,
    /// Reject output containing NaN or infinite values.
    pub reject_non_finite: bool,
    /// Run the label and range checks at all.
    pub check_values: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            range_tolerance: 1e-3,
            reject_non_finite: true,
            check_values: true,
        }
    }
}

impl ValidationConfig {
    /// Create a new validation config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range_tolerance(mut self, tolerance: f64) -> Self {
        self.range_tolerance = tolerance;
        self
    }

    /// Only check the output grid.
    pub fn without_value_checks(mut self) -> Self {
        self.check_values = false;
        self.reject_non_finite = false;
        self
    }
}

/// The output must be sampled on `expected`.
pub fn validate_output_grid<B: Backend>(expected: &GridGeometry, output: &Volume<B>) -> Result<()> {
    let actual = output.geometry();
    if expected.is_compatible(&actual) {
        Ok(())
    } else {
        Err(PipelineError::format(format!(
            "resampled volume is on {} but the fixed grid is {}",
            actual, expected
        )))
    }
}

/// Nearest-neighbour output may only contain input values and `default_value`.
pub fn validate_labels<B: Backend>(input: &Volume<B>, output: &Volume<B>, default_value: f64) -> Result<()> {
    let allowed = input.distinct_values()?;
    let default_value = default_value as f32;

    let introduced: Vec<f32> = output
        .distinct_values()?
        .into_iter()
        .filter(|v| *v != default_value && allowed.binary_search_by(|a| a.total_cmp(v)).is_err())
        .collect();

    if introduced.is_empty() {
        return Ok(());
    }
    let shown: Vec<String> = introduced
        .iter()
        .take(MAX_REPORTED_LABELS)
        .map(|v| v.to_string())
        .collect();
    Err(PipelineError::format(format!(
        "nearest-neighbour resampling introduced {} value(s) absent from the input: {}{}",
        introduced.len(),
        shown.join(", "),
        if introduced.len() > MAX_REPORTED_LABELS { ", ..." } else { "" }
    )))
}

/// Linear output must stay within the input range extended by `default_value`.
pub fn validate_range<B: Backend>(
    input: &Volume<B>,
    output: &Volume<B>,
    default_value: f64,
    relative_tolerance: f64,
) -> Result<()> {
    let (in_min, in_max) = input.intensity_range();
    let low = in_min.min(default_value);
    let high = in_max.max(default_value);
    let tolerance = relative_tolerance * (high - low).max(f64::EPSILON);

    let (out_min, out_max) = output.intensity_range();
    if out_min < low - tolerance || out_max > high + tolerance {
        return Err(PipelineError::format(format!(
            "linear resampling produced values in [{:.6}, {:.6}] outside the input range [{:.6}, {:.6}]",
            out_min, out_max, low, high
        )));
    }
    Ok(())
}

pub fn validate_finite<B: Backend>(output: &Volume<B>) -> Result<()> {
    let bad = output.to_vec()?.iter().filter(|v| !v.is_finite()).count();
    if bad > 0 {
        return Err(PipelineError::format(format!(
            "resampled volume contains {} non-finite voxel(s)",
            bad
        )));
    }
    Ok(())
}

/// Run every check that applies to `interpolation`.
///
/// B-spline output may legitimately overshoot the input range, so only the
/// grid and finiteness are checked for it.
pub fn validate_resampled<B: Backend>(
    input: &Volume<B>,
    output: &Volume<B>,
    fixed_grid: &GridGeometry,
    interpolation: Interpolation,
    default_value: f64,
    config: &ValidationConfig,
) -> Result<()> {
    validate_output_grid(fixed_grid, output)?;
    if config.reject_non_finite {
        validate_finite(output)?;
    }
    if !config.check_values {
        return Ok(());
    }
    match interpolation {
        Interpolation::NearestNeighbor => validate_labels(input, output, default_value),
        Interpolation::Linear => validate_range(input, output, default_value, config.range_tolerance),
        Interpolation::BSpline { .. } => Ok(()),
    }
}
