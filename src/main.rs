// src/main.rs

use anyhow::{Context, Result};
use clap::Parser;
use sliced_person_detection::pipeline::{batch_output_paths, PipelineMetrics};
use sliced_person_detection::video_processor::find_video_files;
use sliced_person_detection::{Config, InferencePipeline, PipelineError, RunReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_BAD_INPUT: u8 = 2;
const EXIT_INTERNAL: u8 = 1;

#[derive(Parser)]
#[command(name = "sliced-person-detection")]
#[command(about = "Sliced person detection and annotation for video files")]
#[command(version)]
struct Cli {
    /// Model identifier (yolov8x or rtdetr-x)
    #[arg(short, long)]
    model: String,

    /// Video file, or a directory searched recursively for videos
    #[arg(short, long)]
    input: PathBuf,

    /// Where annotated videos are written (defaults to video.output_dir)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print run reports as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, missing_config) = match load_config(&cli.config) {
        Ok(Some(config)) => (config, false),
        Ok(None) => (Config::default(), true),
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::from(EXIT_BAD_INPUT);
        }
    };

    init_tracing(&config.logging.level);
    if missing_config {
        warn!(
            "Config file {} not found, using defaults",
            cli.config.display()
        );
    } else {
        info!("✓ Configuration loaded from {}", cli.config.display());
    }

    match run(&cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// `Ok(None)` when the file does not exist.
fn load_config(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    Config::load(path)
        .map(Some)
        .with_context(|| format!("invalid configuration {}", path.display()))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("sliced_person_detection={},ort=warn", level))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<PipelineError>() {
        Some(e) if e.is_bad_input() => EXIT_BAD_INPUT,
        _ => EXIT_INTERNAL,
    }
}

fn run(cli: &Cli, config: Config) -> Result<()> {
    let output_dir = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.video.output_dir));
    let pipeline = InferencePipeline::new(config)?;

    if cli.input.is_dir() {
        return run_batch(cli, &pipeline, &output_dir);
    }

    let report = pipeline.run_with_report(&cli.model, &cli.input, &output_dir)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.output_path.display());
    }
    Ok(())
}

/// Every video is an independent run. The returned error is the worst
/// failure seen: internal failures outrank bad input.
fn run_batch(cli: &Cli, pipeline: &InferencePipeline, output_dir: &Path) -> Result<()> {
    let videos = find_video_files(&cli.input);
    if videos.is_empty() {
        return Err(PipelineError::NotFound(cli.input.clone()))
            .with_context(|| format!("no video files under {}", cli.input.display()));
    }
    info!("Found {} video file(s) to process", videos.len());
    let outputs = batch_output_paths(&cli.input, &videos, &cli.model, output_dir);

    let mut reports: Vec<RunReport> = Vec::with_capacity(videos.len());
    let mut worst: Option<PipelineError> = None;

    for (i, (video, output)) in videos.iter().zip(&outputs).enumerate() {
        info!("[{}/{}] {}", i + 1, videos.len(), video.display());
        match pipeline.run_to(&cli.model, video, output, &PipelineMetrics::new()) {
            Ok(report) => reports.push(report),
            Err(e) => {
                warn!("✗ {}: {}", video.display(), e);
                let outranks = match &worst {
                    None => true,
                    Some(prev) => prev.is_bad_input() && !e.is_bad_input(),
                };
                if outranks {
                    worst = Some(e);
                }
            }
        }
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", report.output_path.display());
        }
    }
    info!(
        "Batch finished: {} succeeded, {} failed",
        reports.len(),
        videos.len() - reports.len()
    );

    match worst {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
