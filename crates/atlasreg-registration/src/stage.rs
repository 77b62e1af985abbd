//! Registration stage configuration.
//!
//! Each stage is one elastix parameter map. The defaults follow elastix's
//! own `GetDefaultParameterMap` for the four supported transform families.

use std::fmt;
use std::str::FromStr;

use atlasreg_core::{PipelineError, Result};
use serde::{Deserialize, Serialize};

use crate::parameter_map::ParameterMap;

/// Transform family of a stage, ordered coarse to fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageMethod {
    Translation,
    Rigid,
    Affine,
    BSpline,
}

impl StageMethod {
    pub const ALL: [StageMethod; 4] = [
        StageMethod::Translation,
        StageMethod::Rigid,
        StageMethod::Affine,
        StageMethod::BSpline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageMethod::Translation => "translation",
            StageMethod::Rigid => "rigid",
            StageMethod::Affine => "affine",
            StageMethod::BSpline => "bspline",
        }
    }

    /// Name of the elastix transform component.
    pub fn elastix_transform(&self) -> &'static str {
        match self {
            StageMethod::Translation => "TranslationTransform",
            StageMethod::Rigid => "EulerTransform",
            StageMethod::Affine => "AffineTransform",
            StageMethod::BSpline => "BSplineTransform",
        }
    }
}

impl fmt::Display for StageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "translation" => Ok(StageMethod::Translation),
            "rigid" => Ok(StageMethod::Rigid),
            "affine" => Ok(StageMethod::Affine),
            "bspline" => Ok(StageMethod::BSpline),
            other => Err(PipelineError::config(format!(
                "unknown stage method '{}' (expected translation, rigid, affine or bspline)",
                other
            ))),
        }
    }
}

/// One registration stage: a transform family and its parameter map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub method: StageMethod,
    pub parameters: ParameterMap,
}

impl StageConfig {
    /// Stage with the default parameter map for `method`.
    pub fn new(method: StageMethod) -> Self {
        Self {
            method,
            parameters: default_map(method),
        }
    }

    /// Stage from a method name, case-insensitive.
    ///
    /// # Errors
    /// [`PipelineError::Config`] for an unknown method name.
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(Self::new(name.parse()?))
    }

    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.parameters.set_one("MaximumNumberOfIterations", iterations);
        self
    }

    /// Override one parameter. Values are passed to the engine unchecked.
    pub fn with_parameter<K, I, V>(mut self, key: K, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.parameters.set(key, values);
        self
    }

    /// Overlay several parameters at once.
    pub fn with_parameters(mut self, overrides: &ParameterMap) -> Self {
        self.parameters.merge(overrides);
        self
    }

    pub fn max_iterations(&self) -> Option<u32> {
        self.parameters.parsed("MaximumNumberOfIterations")
    }
}

/// Translation, rigid, affine: the usual atlas alignment sequence.
pub fn default_stages() -> Vec<StageConfig> {
    [StageMethod::Translation, StageMethod::Rigid, StageMethod::Affine]
        .into_iter()
        .map(StageConfig::new)
        .collect()
}

/// True when the stage methods never go from fine back to coarse.
pub fn is_coarse_to_fine(stages: &[StageConfig]) -> bool {
    stages.windows(2).all(|w| w[0].method <= w[1].method)
}

/// Default parameter map for a method name.
///
/// # Errors
/// [`PipelineError::Config`] for names other than `translation`, `rigid`,
/// `affine` and `bspline` (any case).
pub fn default_parameter_map(name: &str) -> Result<ParameterMap> {
    Ok(default_map(name.parse()?))
}

fn default_map(method: StageMethod) -> ParameterMap {
    let mut map = ParameterMap::new();

    // Image and pyramid setup
    map.set_one("FixedInternalImagePixelType", "float");
    map.set_one("MovingInternalImagePixelType", "float");
    map.set_one("FixedImageDimension", 3);
    map.set_one("MovingImageDimension", 3);
    map.set_one("UseDirectionCosines", "true");
    map.set_one("Registration", "MultiResolutionRegistration");
    map.set_one("FixedImagePyramid", "FixedSmoothingImagePyramid");
    map.set_one("MovingImagePyramid", "MovingSmoothingImagePyramid");
    map.set_one("NumberOfResolutions", 4);

    // Optimisation
    map.set_one("Interpolator", "LinearInterpolator");
    map.set_one("Metric", "AdvancedMattesMutualInformation");
    map.set_one("NumberOfHistogramBins", 32);
    map.set_one("Optimizer", "AdaptiveStochasticGradientDescent");
    map.set_one("MaximumNumberOfIterations", 256);
    map.set_one("ImageSampler", "RandomCoordinate");
    map.set_one("NumberOfSpatialSamples", 2048);
    map.set_one("NewSamplesEveryIteration", "true");
    map.set_one("CheckNumberOfSamples", "true");
    map.set_one("HowToCombineTransforms", "Compose");

    // Final resampling
    map.set_one("Resampler", "DefaultResampler");
    map.set_one("ResampleInterpolator", "FinalBSplineInterpolator");
    map.set_one("BSplineInterpolationOrder", 1);
    map.set_one("FinalBSplineInterpolationOrder", 3);
    map.set_one("DefaultPixelValue", 0);
    map.set_one("WriteResultImage", "true");
    map.set_one("ResultImagePixelType", "float");
    map.set_one("ResultImageFormat", "nii");

    map.set_one("Transform", method.elastix_transform());
    match method {
        StageMethod::Translation => {
            map.set_one("AutomaticTransformInitialization", "true");
            map.set_one("AutomaticTransformInitializationMethod", "CenterOfGravity");
        }
        StageMethod::Rigid | StageMethod::Affine => {
            map.set_one("AutomaticScalesEstimation", "true");
            map.set_one("AutomaticTransformInitialization", "true");
        }
        StageMethod::BSpline => {
            map.set_one("Registration", "MultiMetricMultiResolutionRegistration");
            map.set("Metric", ["AdvancedMattesMutualInformation", "TransformBendingEnergyPenalty"]);
            map.set_one("Metric0Weight", "1.0");
            map.set_one("Metric1Weight", "1.0");
            map.set_one("FinalGridSpacingInPhysicalUnits", 10);
            map.set_one("MaximumNumberOfIterations", 512);
        }
    }

    map
}
