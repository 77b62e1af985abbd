//! Seam between the pipeline and the registration engine that does the
//! numerical work.

use std::fmt;
use std::str::FromStr;

use atlasreg_core::{PipelineError, Result, Volume};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::parameter_map::ParameterMap;
use crate::stage::StageConfig;
use crate::transform::CompositeTransform;

/// Highest B-spline order elastix supports for final resampling.
pub const MAX_BSPLINE_ORDER: u8 = 5;

/// Interpolation used when resampling a volume through a transform.
///
/// There is no default: label maps need [`Interpolation::NearestNeighbor`],
/// intensity volumes usually [`Interpolation::Linear`] or a B-spline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Interpolation {
    NearestNeighbor,
    Linear,
    BSpline { order: u8 },
}

impl Interpolation {
    /// Parse a mode name with an optional B-spline order (default 3).
    ///
    /// # Errors
    /// [`PipelineError::Config`] for unknown names or an order above
    /// [`MAX_BSPLINE_ORDER`].
    pub fn from_name(name: &str, bspline_order: Option<u8>) -> Result<Self> {
        let mode = match name.trim().to_ascii_lowercase().as_str() {
            "nearest" | "nearestneighbor" | "nearest_neighbor" | "nn" => Interpolation::NearestNeighbor,
            "linear" => Interpolation::Linear,
            "bspline" => {
                let order = bspline_order.unwrap_or(3);
                if order > MAX_BSPLINE_ORDER {
                    return Err(PipelineError::config(format!(
                        "B-spline order {} exceeds {}",
                        order, MAX_BSPLINE_ORDER
                    )));
                }
                Interpolation::BSpline { order }
            }
            other => {
                return Err(PipelineError::config(format!(
                    "unknown interpolation '{}' (expected nearest, linear or bspline)",
                    other
                )))
            }
        };
        Ok(mode)
    }

    /// elastix `ResampleInterpolator` component.
    pub fn elastix_interpolator(&self) -> &'static str {
        match self {
            Interpolation::NearestNeighbor => "FinalNearestNeighborInterpolator",
            Interpolation::Linear => "FinalLinearInterpolator",
            Interpolation::BSpline { .. } => "FinalBSplineInterpolator",
        }
    }

    /// Value for `FinalBSplineInterpolationOrder`.
    pub fn bspline_order(&self) -> u8 {
        match self {
            Interpolation::NearestNeighbor => 0,
            Interpolation::Linear => 1,
            Interpolation::BSpline { order } => *order,
        }
    }

    /// Write the resampling entries into an elastix parameter map.
    pub fn apply_to(&self, parameters: &mut ParameterMap) {
        parameters.set_one("ResampleInterpolator", self.elastix_interpolator());
        parameters.set_one("FinalBSplineInterpolationOrder", self.bspline_order());
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interpolation::NearestNeighbor => f.write_str("nearest"),
            Interpolation::Linear => f.write_str("linear"),
            Interpolation::BSpline { order } => write!(f, "bspline({})", order),
        }
    }
}

impl FromStr for Interpolation {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s, None)
    }
}

/// External registration engine.
///
/// Implementations run the actual optimisation and resampling; the pipeline
/// only checks what comes back.
pub trait RegistrationEngine {
    /// Estimate one parameter map per stage, in stage order, mapping points
    /// of the `fixed` grid into `moving`.
    fn register<B: Backend>(
        &self,
        fixed: &Volume<B>,
        moving: &Volume<B>,
        stages: &[StageConfig],
    ) -> Result<Vec<ParameterMap>>;

    /// Resample `volume` (on the moving grid) onto the fixed grid of `transform`.
    fn resample<B: Backend>(
        &self,
        volume: &Volume<B>,
        transform: &CompositeTransform,
        interpolation: Interpolation,
    ) -> Result<Volume<B>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_names() {
        assert_eq!("nearest".parse::<Interpolation>().unwrap(), Interpolation::NearestNeighbor);
        assert_eq!("Linear".parse::<Interpolation>().unwrap(), Interpolation::Linear);
        assert_eq!(
            Interpolation::from_name("bspline", Some(4)).unwrap(),
            Interpolation::BSpline { order: 4 }
        );
        assert_eq!("bspline".parse::<Interpolation>().unwrap(), Interpolation::BSpline { order: 3 });
    }

    #[test]
    fn test_invalid_interpolation_is_config_error() {
        assert!(matches!("cubic".parse::<Interpolation>(), Err(PipelineError::Config(_))));
        assert!(matches!(
            Interpolation::from_name("bspline", Some(9)),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_apply_to_parameter_map() {
        let mut map = ParameterMap::new();
        Interpolation::NearestNeighbor.apply_to(&mut map);
        assert_eq!(map.first("ResampleInterpolator"), Some("FinalNearestNeighborInterpolator"));
        assert_eq!(map.first("FinalBSplineInterpolationOrder"), Some("0"));

        Interpolation::BSpline { order: 4 }.apply_to(&mut map);
        assert_eq!(map.first("ResampleInterpolator"), Some("FinalBSplineInterpolator"));
        assert_eq!(map.first("FinalBSplineInterpolationOrder"), Some("4"));
    }
}
