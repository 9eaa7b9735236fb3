//! refscale CLI: measure objects against a size reference, calibrate cameras.

use clap::{ArgAction, Args, Parser, Subcommand};
use refscale::{
    calibrate_files, init_with_level, level_from_verbosity, read_truth_sidecar, BoardSpec,
    CalibrationParams, CalibrationProfile, ErrorMetrics, MeasureError, MeasurementPipeline,
    MeasurementResult, PipelineConfig, ReferenceSpec, TruthUnit,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "refscale")]
#[command(about = "Estimate object dimensions from photos with a size reference")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit structured JSON tracing instead of plain log lines.
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    trace_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure the dominant object in each image.
    Measure(MeasureArgs),
    /// Calibrate a camera from checkerboard images.
    Calibrate(CalibrateArgs),
}

#[derive(Debug, Args)]
struct MeasureArgs {
    /// Input images.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Pipeline configuration (JSON); flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Measure against a reference object of this size (mm) instead of a sheet.
    #[arg(long, num_args = 2, value_names = ["WIDTH_MM", "HEIGHT_MM"])]
    reference_object: Option<Vec<f64>>,

    /// Rectified canvas scale for the sheet strategy.
    #[arg(long)]
    px_per_mm: Option<f64>,

    /// Empirical correction factor for the reference-object strategy.
    #[arg(long)]
    correction_factor: Option<f64>,

    /// Camera profile (JSON) used to undistort inputs.
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Ignore the profile's distortion model.
    #[arg(long)]
    no_undistort: bool,

    /// Print one JSON object per image.
    #[arg(long)]
    json: bool,

    /// Compare against `<image>.txt` ground truth ("width height") when present.
    #[arg(long)]
    truth: bool,

    /// Unit of the ground-truth sidecars (cm or mm).
    #[arg(long, default_value = "cm")]
    truth_unit: TruthUnit,
}

#[derive(Debug, Args)]
struct CalibrateArgs {
    /// Checkerboard images.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Inner corners per row.
    #[arg(long, default_value_t = 9)]
    cols: u32,

    /// Inner corners per column.
    #[arg(long, default_value_t = 7)]
    rows: u32,

    /// Square size in millimetres.
    #[arg(long, default_value_t = 20.0)]
    square: f64,

    /// Where to write the profile (JSON).
    #[arg(long)]
    out: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let outcome = match &cli.command {
        Commands::Measure(args) => run_measure(args),
        Commands::Calibrate(args) => run_calibrate(args),
    };
    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) {
    if cli.trace_json {
        let _ = tracing_log::LogTracer::init();
        refscale::init_tracing(true);
        return;
    }
    let _ = init_with_level(level_from_verbosity(cli.verbose));
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) {
    let _ = init_with_level(level_from_verbosity(cli.verbose));
}

fn build_config(args: &MeasureArgs) -> CliResult<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_json(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dims) = &args.reference_object {
        if let [w, h] = dims.as_slice() {
            config.reference = ReferenceSpec::ExplicitReferenceObject {
                width_mm: *w,
                height_mm: *h,
            };
        }
    }
    if let Some(scale) = args.px_per_mm {
        if let ReferenceSpec::ImplicitRectified { sheet } = &mut config.reference {
            sheet.px_per_mm = scale;
        }
    }
    if let Some(factor) = args.correction_factor {
        config.reference_object.correction_factor = factor;
    }
    if args.no_undistort {
        config.undistort = false;
    }
    config.validate()?;
    Ok(config)
}

fn run_measure(args: &MeasureArgs) -> CliResult<ExitCode> {
    let config = build_config(args)?;
    let mut pipeline = MeasurementPipeline::new(config)?;
    if let Some(path) = &args.profile {
        let profile = CalibrationProfile::load_json(path).map_err(MeasureError::from)?;
        pipeline = pipeline.with_profile(Arc::new(profile));
    }

    let results = pipeline.measure_files(&args.images);
    let mut succeeded = 0usize;
    for (path, result) in args.images.iter().zip(&results) {
        if result.is_ok() {
            succeeded += 1;
        }
        let truth = if args.truth {
            read_truth_sidecar(path, args.truth_unit).unwrap_or_else(|e| {
                log::warn!("{}: ignoring ground truth: {e}", path.display());
                None
            })
        } else {
            None
        };
        if args.json {
            println!("{}", json_line(path, result, truth));
        } else {
            println!("{}", text_line(path, result, truth));
        }
    }

    log::info!("{succeeded} of {} images measured", results.len());
    Ok(if succeeded == 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn metrics(result: &MeasurementResult, truth: Option<(f64, f64)>) -> Option<ErrorMetrics> {
    truth.map(|t| ErrorMetrics::compute((result.width_mm, result.height_mm), t))
}

fn text_line(
    path: &Path,
    result: &Result<MeasurementResult, MeasureError>,
    truth: Option<(f64, f64)>,
) -> String {
    match result {
        Ok(r) => {
            let mut line = format!(
                "{}: {:.1} x {:.1} mm ({})",
                path.display(),
                r.width_mm,
                r.height_mm,
                r.strategy
            );
            if let Some(m) = metrics(r, truth) {
                line.push_str(&format!(
                    "; actual {:.1} x {:.1}, error {:.2} / {:.2} mm ({:.1}% / {:.1}%)",
                    m.actual.0, m.actual.1, m.abs_error.0, m.abs_error.1, m.rel_error_pct.0, m.rel_error_pct.1
                ));
            }
            line
        }
        Err(e) => format!("{}: FAILED [{}] {e}", path.display(), e.code()),
    }
}

fn json_line(
    path: &Path,
    result: &Result<MeasurementResult, MeasureError>,
    truth: Option<(f64, f64)>,
) -> serde_json::Value {
    match result {
        Ok(r) => json!({
            "image": path.display().to_string(),
            "ok": true,
            "result": r,
            "error_metrics": metrics(r, truth),
        }),
        Err(e) => json!({
            "image": path.display().to_string(),
            "ok": false,
            "error": {
                "code": e.code(),
                "stage": e.stage(),
                "message": e.to_string(),
            },
        }),
    }
}

fn run_calibrate(args: &CalibrateArgs) -> CliResult<ExitCode> {
    let params = CalibrationParams::for_board(BoardSpec::new(args.cols, args.rows, args.square));
    let result = calibrate_files(&args.images, &params)?;
    result.profile.write_json(&args.out).map_err(MeasureError::from)?;

    let k = result.profile.intrinsics();
    println!(
        "calibrated from {} of {} images: fx {:.2} fy {:.2} cx {:.2} cy {:.2}, rms {:.3} px",
        result.views.len(),
        args.images.len(),
        k.fx,
        k.fy,
        k.cx,
        k.cy,
        result.profile.reprojection_error
    );
    for idx in &result.skipped {
        println!("  skipped {}", args.images[*idx].display());
    }
    println!("profile written to {}", args.out.display());
    Ok(ExitCode::SUCCESS)
}
