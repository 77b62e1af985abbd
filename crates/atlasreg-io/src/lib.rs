//! Volume file I/O for atlasreg.
//!
//! NIfTI reading and writing with geometry preserved, plus discovery and
//! conversion of DICOM series through `dcm2niix`.

pub mod dcm2niix;
pub mod nifti_io;

pub use dcm2niix::{discover_series, is_missing_executable, Dcm2Niix, SeriesConverter, SeriesDir};
pub use nifti_io::{ensure_output_dir, read_nifti, write_nifti};
