//! arcam CLI: run a configured pipeline and scaffold its input files.

use std::error::Error;
use std::path::{Path, PathBuf};

use arcam::camera::Arity;
use arcam::core::{CameraParameters, ImageSize, LensModel, StereoExtrinsics};
use arcam::{Pipeline, PipelineConfig};
use clap::{Parser, Subcommand, ValueEnum};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "arcam")]
#[command(about = "Camera calibration and undistortion pipeline")]
#[command(version)]
struct Cli {
    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit JSON logs (requires the `tracing` feature).
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline described by a config file and print a JSON summary.
    Run {
        /// Pipeline config (JSON).
        #[arg(long)]
        config: PathBuf,

        /// Override the number of host cycles.
        #[arg(long)]
        cycles: Option<u64>,
    },

    /// Write a default pipeline config.
    InitConfig {
        #[arg(long)]
        out: PathBuf,

        /// Enable undistortion with parameters read from this file.
        #[arg(long)]
        params: Option<PathBuf>,

        /// Number of camera channels.
        #[arg(long, default_value_t = 1)]
        channels: usize,
    },

    /// Write ideal (distortion-free) camera parameters.
    InitParams {
        #[arg(long)]
        out: PathBuf,

        #[arg(long, value_enum, default_value_t = LensArg::Pinhole)]
        lens: LensArg,

        #[arg(long, default_value_t = 1)]
        cameras: usize,

        #[arg(long, default_value_t = 640)]
        width: usize,

        #[arg(long, default_value_t = 480)]
        height: usize,

        /// Focal length in pixels.
        #[arg(long, default_value_t = 500.0)]
        focal: f64,

        /// Stereo baseline along -x, used when `--cameras 2`.
        #[arg(long, default_value_t = 0.1)]
        baseline: f64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LensArg {
    Pinhole,
    Omnidir,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {}", arcam::lifecycle::error_chain(err.as_ref()));
        std::process::exit(1);
    }
}

fn try_main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_log)?;

    match cli.command {
        Commands::Run { config, cycles } => run(&config, cycles),
        Commands::InitConfig {
            out,
            params,
            channels,
        } => init_config(&out, params, channels),
        Commands::InitParams {
            out,
            lens,
            cameras,
            width,
            height,
            focal,
            baseline,
        } => init_params(&out, lens, cameras, ImageSize::new(width, height), focal, baseline),
    }
}

#[cfg(feature = "tracing")]
fn init_logging(verbose: bool, json: bool) -> CliResult<()> {
    let _ = tracing_log::LogTracer::init();
    arcam::core::init_tracing(json, verbose);
    Ok(())
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: bool, json: bool) -> CliResult<()> {
    if json {
        return Err("--json-log needs a build with the `tracing` feature".into());
    }
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    arcam::core::init_with_level(level)?;
    Ok(())
}

fn run(config_path: &Path, cycles: Option<u64>) -> CliResult<()> {
    let config = PipelineConfig::load_json(config_path)?;
    let cycles = cycles.unwrap_or(config.cycles);
    log::info!("running {} for {cycles} cycles", config_path.display());

    let mut pipeline = Pipeline::new(&config)?;
    pipeline.start()?;
    let summary = pipeline.run(cycles)?;
    pipeline.shutdown()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_config(out: &Path, params: Option<PathBuf>, channels: usize) -> CliResult<()> {
    let mut config = match params {
        Some(params) => PipelineConfig::with_parameters_file(params),
        None => PipelineConfig::default(),
    };
    config.camera.channels = channels;
    if let Some(section) = config.undistortion.as_mut() {
        section.settings.arity = if channels == 2 {
            Arity::Stereo
        } else {
            Arity::Mono
        };
    }
    config.write_json(out)?;
    log::info!("wrote {}", out.display());
    Ok(())
}

fn init_params(
    out: &Path,
    lens: LensArg,
    cameras: usize,
    size: ImageSize,
    focal: f64,
    baseline: f64,
) -> CliResult<()> {
    let mut params = CameraParameters::ideal_pinhole(cameras, size, focal);
    if let LensArg::Omnidir = lens {
        params.lens = LensModel::Omnidir;
        params.distortion = vec![vec![0.0; 4]; cameras];
        params.omnidir_xi = vec![1.0; cameras];
    }
    if cameras == 2 {
        params.stereo = Some(StereoExtrinsics {
            rotation: [0.0; 3],
            translation: [-baseline, 0.0, 0.0],
        });
    }
    params.validate()?;
    params.write_json(out)?;
    log::info!("wrote {}", out.display());
    Ok(())
}
