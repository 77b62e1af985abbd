use anyhow::{bail, Context, Result};
use atlasreg_core::Volume;
use atlasreg_io::{ensure_output_dir, read_nifti, write_nifti, Dcm2Niix};
use atlasreg_registration::{
    convert_all, default_parameter_map, default_stages, register_all, BatchReport, CompositeTransform,
    ConsoleProgressCallback, ElastixEngine, FailureLog, Interpolation, PipelineConfig, ProgressBarCallback,
    ProgressTracker, RegistrationJob, RegistrationRunner, StageConfig, StageMethod,
};
use burn_ndarray::NdArray;
use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

type Backend = NdArray<f32>;

#[derive(Parser)]
#[command(name = "atlasreg")]
#[command(about = "DICOM conversion and multi-stage atlas registration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every DICOM series directory to NIfTI with dcm2niix
    Convert {
        /// Pipeline configuration file (uses [paths] and [converter])
        #[arg(short, long, conflicts_with_all = ["input", "output"])]
        config: Option<PathBuf>,

        /// Directory whose subdirectories are DICOM series
        #[arg(short, long, requires = "output")]
        input: Option<PathBuf>,

        /// Directory for the NIfTI files
        #[arg(short, long, requires = "input")]
        output: Option<PathBuf>,

        /// dcm2niix executable
        #[arg(long, default_value = "dcm2niix")]
        dcm2niix: PathBuf,

        /// Write .nii instead of .nii.gz
        #[arg(long)]
        no_compress: bool,

        /// Append-only log of failed series
        #[arg(long, default_value = "conversion_errors.log")]
        failure_log: PathBuf,

        /// Series converted in parallel (default 1, or [batch] workers)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Register a moving volume to a fixed volume and resample it
    Register {
        /// Registration target; the output is written on its grid
        #[arg(short, long)]
        fixed: PathBuf,

        /// Volume to align, e.g. the atlas
        #[arg(short, long)]
        moving: PathBuf,

        /// Resampled output file
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        interpolation: InterpolationArgs,

        /// Stage methods in order (default: translation rigid affine)
        #[arg(short, long = "stage", value_name = "METHOD")]
        stages: Vec<String>,

        /// Override MaximumNumberOfIterations for every stage
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Resample this volume instead of the moving one (same grid required)
        #[arg(long)]
        resample: Option<PathBuf>,

        /// Directory to persist the estimated transform in
        #[arg(long)]
        save_transform: Option<PathBuf>,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Resample a volume through a saved transform
    Resample {
        /// Volume on the transform's moving grid
        #[arg(short, long)]
        volume: PathBuf,

        /// Directory written by `register --save-transform`
        #[arg(short, long)]
        transform: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        interpolation: InterpolationArgs,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Run every [[jobs]] entry of a configuration file
    Batch {
        #[arg(short, long)]
        config: PathBuf,

        /// Override [batch] workers
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Zero every voxel where the mask is not positive
    Mask {
        #[arg(short, long)]
        volume: PathBuf,

        /// Mask on the same grid as the volume
        #[arg(short, long)]
        mask: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print grid and intensity information of a volume
    Inspect {
        #[arg(short, long)]
        volume: PathBuf,
    },

    /// Print default stage parameter maps in elastix format
    Stages {
        /// translation, rigid, affine or bspline (all if omitted)
        method: Option<String>,
    },
}

#[derive(Args)]
struct InterpolationArgs {
    /// nearest (label maps), linear or bspline
    #[arg(short, long)]
    interpolation: String,

    /// B-spline order for --interpolation bspline
    #[arg(long)]
    bspline_order: Option<u8>,
}

impl InterpolationArgs {
    fn mode(&self) -> Result<Interpolation> {
        Ok(Interpolation::from_name(&self.interpolation, self.bspline_order)?)
    }
}

#[derive(Args)]
struct EngineArgs {
    #[arg(long, default_value = "elastix")]
    elastix: PathBuf,

    #[arg(long, default_value = "transformix")]
    transformix: PathBuf,

    /// Threads passed to elastix/transformix
    #[arg(long)]
    threads: Option<usize>,
}

impl EngineArgs {
    fn engine(&self) -> ElastixEngine {
        let mut engine = ElastixEngine::new(&self.elastix, &self.transformix);
        engine.threads = self.threads;
        engine
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            config,
            input,
            output,
            dcm2niix,
            no_compress,
            failure_log,
            workers,
        } => {
            let report = match config {
                Some(path) => convert_from_config(&path, workers)?,
                None => {
                    let (Some(input), Some(output)) = (input, output) else {
                        bail!("either --config or both --input and --output are required");
                    };
                    let converter = Dcm2Niix::new(dcm2niix).with_compression(!no_compress);
                    run_conversion(&converter, &input, &output, &failure_log, workers.unwrap_or(1))?
                }
            };
            print_report("Conversion", &report);
        }
        Commands::Register {
            fixed,
            moving,
            output,
            interpolation,
            stages,
            max_iterations,
            resample,
            save_transform,
            engine,
        } => {
            let stages = build_stages(&stages, max_iterations)?;
            let mut job = RegistrationJob::new("register", fixed, moving, output, interpolation.mode()?, stages);
            job.resample = resample;
            job.transform_dir = save_transform;

            let runner = RegistrationRunner::new(engine.engine());
            let device = Default::default();
            let outcome = runner.run_job::<Backend>(&job, &device)?;
            println!(
                "Registration completed in {:.2} seconds, result written to {}",
                outcome.registration_time.as_secs_f64(),
                outcome.output.display()
            );
        }
        Commands::Resample {
            volume,
            transform,
            output,
            interpolation,
            engine,
        } => {
            let transform = CompositeTransform::load(&transform)
                .with_context(|| format!("Failed to load transform from {}", transform.display()))?;
            let runner = RegistrationRunner::new(engine.engine());
            let device = Default::default();
            runner.resample_file::<Backend>(&volume, &transform, interpolation.mode()?, &output, &device)?;
            info!("Resampled volume written to {}", output.display());
        }
        Commands::Batch { config, workers } => {
            let report = run_batch(&config, workers)?;
            print_report("Registration", &report);
        }
        Commands::Mask { volume, mask, output } => {
            apply_mask(&volume, &mask, &output)?;
        }
        Commands::Inspect { volume } => {
            inspect(&volume)?;
        }
        Commands::Stages { method } => {
            print_stages(method.as_deref())?;
        }
    }

    Ok(())
}

fn build_stages(names: &[String], max_iterations: Option<u32>) -> Result<Vec<StageConfig>> {
    let stages = if names.is_empty() {
        default_stages()
    } else {
        names
            .iter()
            .map(|name| StageConfig::from_name(name))
            .collect::<atlasreg_core::Result<Vec<_>>>()?
    };
    Ok(match max_iterations {
        Some(n) => stages.into_iter().map(|s| s.with_max_iterations(n)).collect(),
        None => stages,
    })
}

fn progress_tracker(description: &str) -> ProgressTracker {
    let tracker = ProgressTracker::new();
    if std::io::stderr().is_terminal() {
        tracker.with_callback(Arc::new(ProgressBarCallback::new(description)))
    } else {
        tracker.with_callback(Arc::new(ConsoleProgressCallback::default()))
    }
}

fn run_conversion(
    converter: &Dcm2Niix,
    input: &Path,
    output: &Path,
    failure_log: &Path,
    workers: usize,
) -> Result<BatchReport> {
    info!("Converting DICOM series in {} to {}", input.display(), output.display());
    let log = FailureLog::open(failure_log)?;
    let progress = progress_tracker("Converting DICOM to NIfTI");
    Ok(convert_all(converter, input, output, &log, &progress, workers)?)
}

fn convert_from_config(path: &Path, workers: Option<usize>) -> Result<BatchReport> {
    let config = PipelineConfig::load_from_path(path)?;
    let input = config
        .paths
        .input_root
        .as_deref()
        .context("paths.input_root is required for conversion")?;
    let output = config
        .paths
        .output_root
        .as_deref()
        .context("paths.output_root is required for conversion")?;
    let failure_log = config.resolve(&config.converter.failure_log);
    let workers = workers.unwrap_or(config.batch.workers);
    run_conversion(&config.converter(), input, output, &failure_log, workers)
}

fn run_batch(path: &Path, workers: Option<usize>) -> Result<BatchReport> {
    let config = PipelineConfig::load_from_path(path)?;
    let jobs = config.registration_jobs()?;
    if jobs.is_empty() {
        warn!("{} defines no [[jobs]]", path.display());
    }

    let workers = workers.unwrap_or(config.batch.workers);
    let log = FailureLog::open(config.resolve(&config.paths.failure_log))?;
    let runner = RegistrationRunner::new(config.engine());
    let progress = progress_tracker("Registering");
    let device = Default::default();

    Ok(register_all::<Backend, _>(&runner, &jobs, &device, &log, &progress, workers)?)
}

fn print_report(what: &str, report: &BatchReport) {
    println!(
        "{} finished in {:.2} seconds: {} succeeded, {} failed",
        what,
        report.elapsed.as_secs_f64(),
        report.succeeded,
        report.failed
    );
    for name in &report.failures {
        println!("  failed: {}", name);
    }
}

fn apply_mask(volume: &Path, mask: &Path, output: &Path) -> Result<()> {
    let device = Default::default();
    let image = read_nifti::<Backend, _>(volume, &device)?;
    let mask_image = read_nifti::<Backend, _>(mask, &device)?;
    let masked = image.masked(&mask_image)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_output_dir(parent)?;
    }
    write_nifti(output, &masked)?;
    info!("Masked volume written to {}", output.display());
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let device = Default::default();
    let volume: Volume<Backend> = read_nifti(path, &device)?;
    let geometry = volume.geometry();
    let [nz, ny, nx] = geometry.shape;
    let (min, max) = volume.intensity_range();
    let distinct = volume.distinct_values()?.len();

    println!("{}", path.display());
    println!("  size:      {} x {} x {} (x, y, z)", nx, ny, nz);
    println!(
        "  spacing:   {:.4} x {:.4} x {:.4} mm",
        geometry.spacing.x, geometry.spacing.y, geometry.spacing.z
    );
    println!(
        "  origin:    ({:.3}, {:.3}, {:.3})",
        geometry.origin.x, geometry.origin.y, geometry.origin.z
    );
    let d = geometry.direction.matrix();
    println!("  direction: [{:.4} {:.4} {:.4}]", d[(0, 0)], d[(0, 1)], d[(0, 2)]);
    println!("             [{:.4} {:.4} {:.4}]", d[(1, 0)], d[(1, 1)], d[(1, 2)]);
    println!("             [{:.4} {:.4} {:.4}]", d[(2, 0)], d[(2, 1)], d[(2, 2)]);
    let (low, high) = geometry.physical_bounds();
    println!(
        "  extent:    ({:.3}, {:.3}, {:.3}) to ({:.3}, {:.3}, {:.3})",
        low.x, low.y, low.z, high.x, high.y, high.z
    );
    println!("  range:     [{}, {}]", min, max);
    println!("  distinct:  {} value(s)", distinct);
    Ok(())
}

fn print_stages(method: Option<&str>) -> Result<()> {
    let names: Vec<&str> = match method {
        Some(name) => vec![name],
        None => StageMethod::ALL.iter().map(|m| m.as_str()).collect(),
    };
    for name in names {
        let map = default_parameter_map(name)?;
        println!("// {}", name.to_ascii_lowercase());
        print!("{}", map);
        println!();
    }
    Ok(())
}
