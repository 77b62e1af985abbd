pub mod error;
pub mod image;
pub mod spatial;

pub use error::{PipelineError, Result};
pub use image::{GridGeometry, Volume};
pub use spatial::{Direction3, Point3, Spacing3, Vector3};
