//! Multi-stage atlas registration on top of an external engine.
//!
//! Stages are elastix parameter maps ([`stage`], [`parameter_map`]). A
//! [`RegistrationRunner`] drives any [`RegistrationEngine`], by default the
//! [`ElastixEngine`] subprocess wrapper, and checks what it returns. Batch
//! drivers in [`batch`] run many conversions or jobs with failure isolation.

pub mod batch;
pub mod config;
pub mod elastix;
pub mod engine;
pub mod failure_log;
pub mod job;
pub mod parameter_map;
pub mod progress;
pub mod runner;
pub mod stage;
pub mod transform;
pub mod validation;

pub use batch::{convert_all, register_all, BatchReport};
pub use config::PipelineConfig;
pub use elastix::ElastixEngine;
pub use engine::{Interpolation, RegistrationEngine};
pub use failure_log::FailureLog;
pub use job::{JobFailure, JobOutcome, RegistrationJob};
pub use parameter_map::ParameterMap;
pub use progress::{
    ConsoleProgressCallback, HistoryCallback, ProgressBarCallback, ProgressCallback, ProgressInfo, ProgressTracker,
};
pub use runner::RegistrationRunner;
pub use stage::{default_parameter_map, default_stages, StageConfig, StageMethod};
pub use transform::{CompositeTransform, TransformStage};
pub use validation::ValidationConfig;
