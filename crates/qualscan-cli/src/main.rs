//! Qualscan CLI - image and video quality diagnosis
//!
//! Thin shell over the engine's in-process operations: parse arguments,
//! call the context, print JSON, map the outcome to an exit code.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use qualscan_core::config::{DetectionOptions, SampleOptions, SampleStrategy};
use qualscan_core::DetectionLevel;
use qualscan_engine::batch::{batch_exit_code, error_exit_code};
use qualscan_engine::ops::{AppConfig, AppContext};
use qualscan_engine::source::NullConnector;

/// Qualscan - image and video quality diagnosis
#[derive(Parser, Debug)]
#[command(name = "qualscan")]
#[command(about = "Detect blur, exposure, noise, signal and stability defects", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Data root for tasks, history and profiles.yaml
    #[arg(long, default_value = "./qualscan-data", global = true)]
    data_root: PathBuf,

    /// Threshold profile (strict, normal, loose)
    #[arg(short, long, default_value = "normal", global = true)]
    profile: String,

    /// Detection level (fast, standard, deep)
    #[arg(short, long, default_value = "standard", global = true)]
    level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Diagnose one or more still images
    Image {
        /// Image file paths
        paths: Vec<PathBuf>,

        /// Restrict to these detectors (comma-separated names)
        #[arg(short = 'd', long)]
        detectors: Option<String>,
    },

    /// Diagnose every matching image under a directory
    Batch {
        /// Input directory
        dir: PathBuf,

        /// File name glob
        #[arg(short = 'g', long, default_value = "*.jpg")]
        pattern: String,

        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Diagnose a video given as a directory of decoded frames
    Video {
        /// Directory of frame images (sorted by name)
        dir: PathBuf,

        /// Frame rate of the sequence
        #[arg(long, default_value = "1.0")]
        fps: f64,

        /// Sampling strategy (interval, scene, hybrid)
        #[arg(short = 's', long, default_value = "interval")]
        strategy: String,

        /// Seconds between samples
        #[arg(short = 'i', long, default_value = "1.0")]
        interval: f64,

        /// Sampled frame cap
        #[arg(short = 'n', long, default_value = "300")]
        max_frames: usize,
    },

    /// List registered detectors
    Detectors,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(error_exit_code(&e) as u8)
        }
    }
}

fn run(cli: Cli) -> qualscan_core::Result<i32> {
    let detection = DetectionOptions {
        profile: cli.profile.clone(),
        level: cli.level.parse::<DetectionLevel>()?,
        ..Default::default()
    };

    let ctx = AppContext::init(
        AppConfig {
            data_root: cli.data_root.clone(),
            ..Default::default()
        },
        Arc::new(NullConnector),
    )?;

    let code = match cli.command {
        Commands::Image { paths, detectors } => {
            if paths.is_empty() {
                return Err(qualscan_core::QualscanError::Input(
                    "no input paths given".to_string(),
                ));
            }
            if let [only] = paths.as_slice() {
                if !only.exists() {
                    return Err(qualscan_core::QualscanError::NotFound(format!(
                        "input not found: {}",
                        only.display()
                    )));
                }
            }
            let mut opts = detection;
            if let Some(names) = detectors {
                opts.detectors = Some(names.split(',').map(|s| s.trim().to_string()).collect());
            }
            let report = ctx.diagnose_batch(&paths, &opts);
            println!("{}", serde_json::to_string_pretty(&report)?);
            batch_exit_code(&report.summary)
        }
        Commands::Batch {
            dir,
            pattern,
            recursive,
        } => {
            let inputs = qualscan_engine::batch::enumerate_inputs(&dir, &pattern, recursive)?;
            let report = ctx.diagnose_batch(&inputs, &detection);
            println!("{}", serde_json::to_string_pretty(&report)?);
            batch_exit_code(&report.summary)
        }
        Commands::Video {
            dir,
            fps,
            strategy,
            interval,
            max_frames,
        } => {
            let strategy = match strategy.as_str() {
                "interval" => SampleStrategy::Interval,
                "scene" => SampleStrategy::Scene,
                "hybrid" => SampleStrategy::Hybrid,
                other => {
                    return Err(qualscan_core::QualscanError::Config(format!(
                        "unknown sample strategy: {}",
                        other
                    )))
                }
            };
            let sampling = SampleOptions {
                strategy,
                sample_interval: interval,
                max_frames,
            };
            let verdict = ctx.diagnose_video_frames_dir(&dir, fps, &detection, &sampling)?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            // a run degraded by decoder trouble is a partial failure
            if verdict.error_note.is_some() {
                5
            } else {
                0
            }
        }
        Commands::Detectors => {
            let listing = serde_json::json!({
                "image": ctx.list_detectors(),
                "video": ctx.list_video_detectors(),
            });
            println!("{}", serde_json::to_string_pretty(&listing)?);
            0
        }
    };

    ctx.shutdown();
    Ok(code)
}
