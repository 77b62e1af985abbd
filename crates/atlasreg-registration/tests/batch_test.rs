mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use atlasreg_core::{PipelineError, Result};
use atlasreg_io::{write_nifti, SeriesConverter, SeriesDir};
use atlasreg_registration::{
    convert_all, default_stages, register_all, FailureLog, HistoryCallback, Interpolation, ProgressTracker,
    RegistrationJob, RegistrationRunner,
};
use proptest::prelude::*;
use common::{intensity_target, label_atlas, FakeEngine, ResampleMode, TestBackend};
use tempfile::tempdir;

/// Converter that fails for series whose name contains "corrupt".
struct FakeConverter;

impl SeriesConverter for FakeConverter {
    fn convert(&self, series: &SeriesDir, output_dir: &Path) -> Result<PathBuf> {
        if series.name.contains("corrupt") {
            return Err(PipelineError::conversion(&series.name, "invalid DICOM header"));
        }
        let out = output_dir.join(format!("{}.nii.gz", series.name));
        fs::write(&out, b"nifti").map_err(|e| PipelineError::io(&out, e))?;
        Ok(out)
    }
}

fn make_series(root: &Path, names: &[&str]) {
    for name in names {
        fs::create_dir_all(root.join(name)).unwrap();
        fs::write(root.join(name).join("IM0001.dcm"), b"DICM").unwrap();
    }
}

fn nifti_outputs(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".nii.gz"))
        .collect();
    names.sort();
    names
}

#[test]
fn test_one_corrupt_series_does_not_stop_the_batch() {
    for workers in [1, 4] {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let out_dir = output.path().join("Nifti_T1_images");
        make_series(
            input.path(),
            &["WILLIS_4min_-_501", "corrupt_-_7", "sT1W_3D_TFE_-_1401", "t1_se_tra_4mm_-_13"],
        );

        let log_path = output.path().join("conversion_errors.log");
        let log = FailureLog::open(&log_path).unwrap();
        let history = Arc::new(HistoryCallback::new());
        let progress = ProgressTracker::new().with_callback(history.clone());

        let report = convert_all(&FakeConverter, input.path(), &out_dir, &log, &progress, workers).unwrap();

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures, vec!["corrupt_-_7".to_string()]);
        assert_eq!(
            nifti_outputs(&out_dir),
            vec!["WILLIS_4min_-_501.nii.gz", "sT1W_3D_TFE_-_1401.nii.gz", "t1_se_tra_4mm_-_13.nii.gz"]
        );

        let log_text = fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = log_text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("corrupt_-_7"));
        assert!(lines[0].contains(" - Failed to convert "));

        assert_eq!(history.get_history().len(), 4);
        assert_eq!(history.get_errors().len(), 1);
    }
}

#[test]
fn test_empty_input_root_is_clean() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let log = FailureLog::open(output.path().join("errors.log")).unwrap();

    let report = convert_all(
        &FakeConverter,
        input.path(),
        &output.path().join("nifti"),
        &log,
        &ProgressTracker::new(),
        1,
    )
    .unwrap();
    assert_eq!(report.total(), 0);
    assert!(report.is_clean());
    assert!(output.path().join("nifti").is_dir());
}

#[cfg(unix)]
#[test]
fn test_batch_with_fake_dcm2niix() {
    use atlasreg_io::Dcm2Niix;
    use std::os::unix::fs::PermissionsExt;

    // Arguments: -z y -f NAME -o OUT INPUT
    const SCRIPT: &str = "#!/bin/sh\n\
        if [ -e \"$7/CORRUPT\" ]; then echo \"no valid DICOM images in $7\" >&2; exit 2; fi\n\
        printf 'nifti' > \"$6/$4.nii.gz\"\n";

    let tools = tempdir().unwrap();
    let exe = tools.path().join("dcm2niix");
    fs::write(&exe, SCRIPT).unwrap();
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();

    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    make_series(input.path(), &["angio_-_3", "flair_-_9", "tof_-_5"]);
    fs::write(input.path().join("flair_-_9").join("CORRUPT"), b"").unwrap();
    fs::write(input.path().join("notes.txt"), b"not a series").unwrap();

    let log_path = output.path().join("conversion_errors.log");
    let log = FailureLog::open(&log_path).unwrap();
    let converter = Dcm2Niix::new(&exe);

    let report = convert_all(&converter, input.path(), output.path(), &log, &ProgressTracker::new(), 1).unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failures, vec!["flair_-_9".to_string()]);
    assert_eq!(nifti_outputs(output.path()), vec!["angio_-_3.nii.gz", "tof_-_5.nii.gz"]);

    let log_text = fs::read_to_string(&log_path).unwrap();
    assert_eq!(log_text.lines().count(), 1);
    assert!(log_text.contains("flair_-_9"));
    assert!(log_text.contains("no valid DICOM images"));
}

#[test]
fn test_register_all_isolates_failing_job() {
    let dir = tempdir().unwrap();
    let atlas = dir.path().join("atlas.nii");
    write_nifti(&atlas, &label_atlas()).unwrap();
    for name in ["tof_a.nii.gz", "tof_b.nii.gz"] {
        write_nifti(dir.path().join(name), &intensity_target()).unwrap();
    }

    let job = |name: &str, fixed: &str| {
        RegistrationJob::new(
            name,
            dir.path().join(fixed),
            &atlas,
            dir.path().join("registered").join(format!("{name}.nii.gz")),
            Interpolation::NearestNeighbor,
            default_stages(),
        )
    };
    let jobs = vec![
        job("atlas_to_a", "tof_a.nii.gz"),
        job("atlas_to_missing", "tof_missing.nii.gz"),
        job("atlas_to_b", "tof_b.nii.gz"),
    ];

    let log_path = dir.path().join("registration_errors.log");
    let log = FailureLog::open(&log_path).unwrap();
    let runner = RegistrationRunner::new(FakeEngine::new(ResampleMode::Identity));
    let device = Default::default();

    for workers in [1, 2] {
        let report =
            register_all::<TestBackend, _>(&runner, &jobs, &device, &log, &ProgressTracker::new(), workers).unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failures, vec!["atlas_to_missing".to_string()]);
    }

    assert!(dir.path().join("registered").join("atlas_to_a.nii.gz").is_file());
    assert!(dir.path().join("registered").join("atlas_to_b.nii.gz").is_file());

    let log_text = fs::read_to_string(&log_path).unwrap();
    assert_eq!(log_text.lines().count(), 2);
    assert!(log_text.lines().all(|l| l.contains("atlas_to_missing") && l.contains("tof_missing.nii.gz")));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn test_every_series_is_accounted_for(corrupt in prop::collection::vec(any::<bool>(), 1..8), workers in 1usize..4) {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let names: Vec<String> = corrupt
            .iter()
            .enumerate()
            .map(|(i, &bad)| if bad { format!("corrupt_{i}") } else { format!("series_{i}") })
            .collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        make_series(input.path(), &refs);

        let log = FailureLog::open(output.path().join("errors.log")).unwrap();
        let out_dir = output.path().join("nifti");
        let report = convert_all(&FakeConverter, input.path(), &out_dir, &log, &ProgressTracker::new(), workers).unwrap();

        let expected_failures = corrupt.iter().filter(|&&bad| bad).count();
        prop_assert_eq!(report.total(), names.len());
        prop_assert_eq!(report.failed, expected_failures);
        prop_assert_eq!(nifti_outputs(&out_dir).len(), names.len() - expected_failures);
        let log_text = fs::read_to_string(log.path()).unwrap();
        prop_assert_eq!(log_text.lines().count(), expected_failures);
    }
}
