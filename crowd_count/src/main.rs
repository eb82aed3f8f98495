mod config;
mod modes;
mod process_image;
mod train;
mod tui;
mod video_io;
mod worker;

use std::path::PathBuf;
use std::sync::mpsc;

use clap::{Parser, Subcommand};
use counting_common::annotate::load_font;
use counting_common::video_meta::{report_path_for, CountReport};
use ort::execution_providers::CPUExecutionProvider;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::builder::SessionBuilder;
use ort_common::PersonDetector;
use tracing_subscriber::prelude::*;

use crate::config::AppConfig;
use crate::modes::Mode;
use crate::train::TrainJob;
use crate::video_io::InputSource;
use crate::worker::{LoopSettings, WorkerEvent, WorkerJob};

#[derive(Debug, Parser)]
#[command(about = "Count people in video files and camera streams")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process a video file, a camera or a single image.
    Run(RunArgs),
    /// Fine-tune the detection model on a custom dataset.
    Train {
        #[command(flatten)]
        job: TrainJob,
        /// Only print the commands.
        #[arg(long, action)]
        dry_run: bool,
        /// Export the best weights to ONNX after training.
        #[arg(long, action)]
        export: bool,
    },
    /// Print the summary of a saved run report.
    Report { file: PathBuf },
}

#[derive(Debug, clap::Args)]
pub struct RunArgs {
    /// Image (.jpg/.png), video file (.mp4/.mkv/...), `camera`, `camera:N`
    /// or a device path like `/dev/video0`.
    input: String,
    #[arg(long, value_enum, default_value_t = Mode::Track)]
    mode: Mode,
    /// Yolov8 onnx model file to use.
    #[arg(long, short, default_value = "_models/yolov8s.onnx")]
    model: PathBuf,
    /// Whether to attempt to use `cuda` hw acceleration.
    /// This may silently fail and fallback to cpu acceleration presently.
    #[arg(long, action, default_value = "false")]
    cuda: bool,
    /// JSON config file, missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Show the terminal dashboard.
    #[arg(long, action)]
    tui: bool,
    /// Whether to live playback the annotated frames.
    #[arg(long, action)]
    live: bool,
    /// Encode the annotated frames to `<input>.out.mkv`.
    #[arg(long, action)]
    save_video: bool,
    #[arg(long)]
    conf_threshold: Option<f32>,
    #[arg(long)]
    nms_threshold: Option<f32>,
    /// Process every n-th frame.
    #[arg(long)]
    stride: Option<u64>,
    /// Font for overlay text.
    #[arg(long)]
    font: Option<PathBuf>,
    /// Where to write the run report, defaults to `<input>.counts.json`.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl RunArgs {
    fn config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)?,
            None => AppConfig::default(),
        };
        if let Some(conf) = self.conf_threshold {
            config.conf_threshold = conf;
        }
        if let Some(nms) = self.nms_threshold {
            config.nms_threshold = nms;
        }
        if self.stride.is_some() {
            config.stride = self.stride;
        }
        if self.font.is_some() {
            config.font = self.font.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(quiet: bool) {
    if quiet {
        // The dashboard owns the terminal.
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new("off"))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::sink))
            .init();
        log::set_max_level(log::LevelFilter::Off);
        return;
    }
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "warn,crowd_count=info,counting_common=info,ort_common=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_detector(args: &RunArgs, config: &AppConfig) -> anyhow::Result<PersonDetector> {
    let (ep, ep_name) = if args.cuda {
        (CUDAExecutionProvider::default().build(), "cuda")
    } else {
        (CPUExecutionProvider::default().build(), "cpu")
    };
    ort::init().with_execution_providers([ep]).commit()?;

    let session = SessionBuilder::new()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(&args.model)?;
    log::debug!("{session:?}");
    log::info!(
        "Prepared ort {ep_name} session with model: {:?}",
        args.model
    );

    Ok(PersonDetector::new(session, config.detector_params()))
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.config()?;
    let source = InputSource::parse(&args.input)?;

    let detector = load_detector(&args, &config)?;
    let font = config.font.as_deref().and_then(load_font);
    let mut processor = modes::build_processor(args.mode, detector, &config, font);

    if let InputSource::Image(path) = &source {
        let (img_path, meta_path) = process_image::process_image(path, &mut *processor)?;
        log::info!("Wrote {img_path:?} and {meta_path:?}");
        return Ok(());
    }

    let base = source.output_base();
    let job = WorkerJob {
        source,
        processor,
        width: config.width,
        height: config.height,
        live: args.live,
        save_video: args.save_video.then(|| base.with_extension("out.mkv")),
        output_fps: config.output_fps,
        settings: LoopSettings {
            stride: config.stride_for(args.mode),
            max_runtime: config.max_runtime(),
            report_path: args.report.clone().unwrap_or_else(|| report_path_for(&base)),
        },
    };

    let report = if args.tui {
        tui::run_with_tui(job, config.parameters(args.mode))?
    } else {
        run_headless(job)?
    };
    if let Some(report) = report {
        print!("{}", report.summary());
    }

    Ok(())
}

/// Runs the worker without a dashboard, until the stream ends.
fn run_headless(job: WorkerJob) -> anyhow::Result<Option<CountReport>> {
    // Held until the worker is done, a dropped sender stops it.
    let (_control_tx, control_rx) = mpsc::channel();
    let (event_tx, event_rx) = mpsc::channel();
    let worker = worker::spawn_worker(job, control_rx, event_tx);

    for event in event_rx {
        match event {
            WorkerEvent::Frame(update) => log::debug!(
                "Frame {}: {} people, {:.1} FPS",
                update.frame_number,
                update.people,
                update.fps
            ),
            WorkerEvent::Finished { .. } => break,
            _ => (),
        }
    }

    match worker.join() {
        Ok(report) => report.map(Some),
        Err(_) => anyhow::bail!("Worker thread panicked"),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(matches!(&cli.command, Command::Run(args) if args.tui));

    match cli.command {
        Command::Run(args) => run(args),
        Command::Train {
            job,
            dry_run,
            export,
        } => {
            job.run(dry_run)?;
            if export {
                job.export(dry_run)?;
            }
            Ok(())
        }
        Command::Report { file } => {
            let report = CountReport::load(&file)?;
            print!("{}", report.summary());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "crowd_count",
            "run",
            "door.mp4",
            "--mode",
            "crowd",
            "--stride",
            "2",
            "--conf-threshold",
            "0.6",
            "--save-video",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.mode, Mode::Crowd);
        assert!(args.save_video);

        let config = args.config().unwrap();
        assert_eq!(config.stride_for(Mode::Crowd), 2);
        assert!((config.conf_threshold - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_cli_rejects_bad_threshold() {
        let cli = Cli::try_parse_from(["crowd_count", "run", "a.mp4", "--nms-threshold", "2"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.config().is_err());
    }

    #[test]
    fn test_cli_parses_train() {
        let cli = Cli::try_parse_from(["crowd_count", "train", "--epochs", "5", "--resume", "--dry-run"])
            .unwrap();
        let Command::Train { job, dry_run, export } = cli.command else {
            panic!("expected train");
        };
        assert_eq!(job.epochs, 5);
        assert_eq!(job.model, "yolov5nu.pt");
        assert!(job.resume && dry_run && !export);
    }
}
