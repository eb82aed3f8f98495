//! Fine-tuning the detector through the external `yolo` command line.

use std::path::PathBuf;
use std::process::Command;

use anyhow::Context;

const PROGRAM: &str = "yolo";

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct TrainJob {
    /// Pretrained weights to start from.
    #[arg(long, default_value = "yolov5nu.pt")]
    pub model: String,
    /// Dataset description (yaml).
    #[arg(long, default_value = "data.yml")]
    pub data: PathBuf,
    #[arg(long, default_value_t = 50)]
    pub epochs: u32,
    #[arg(long, default_value_t = 640)]
    pub imgsz: u32,
    #[arg(long, default_value_t = 16)]
    pub batch: u32,
    /// Run name, outputs land in `runs/detect/<name>`.
    #[arg(long, default_value = "yolov5-custom")]
    pub name: String,
    #[arg(long, default_value = "cpu")]
    pub device: String,
    /// Continue an interrupted run from its last checkpoint.
    #[arg(long, action)]
    pub resume: bool,
}

impl Default for TrainJob {
    fn default() -> Self {
        Self {
            model: "yolov5nu.pt".to_string(),
            data: PathBuf::from("data.yml"),
            epochs: 50,
            imgsz: 640,
            batch: 16,
            name: "yolov5-custom".to_string(),
            device: "cpu".to_string(),
            resume: false,
        }
    }
}

impl TrainJob {
    fn weights_dir(&self) -> PathBuf {
        PathBuf::from("runs/detect").join(&self.name).join("weights")
    }

    /// Weights training starts from: the pretrained model, or the run's
    /// last checkpoint when resuming.
    pub fn start_weights(&self) -> String {
        if self.resume {
            self.weights_dir().join("last.pt").display().to_string()
        } else {
            self.model.clone()
        }
    }

    /// Arguments for `yolo` to train.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "detect".to_string(),
            "train".to_string(),
            format!("model={}", self.start_weights()),
            format!("data={}", self.data.display()),
            format!("epochs={}", self.epochs),
            format!("imgsz={}", self.imgsz),
            format!("batch={}", self.batch),
            format!("name={}", self.name),
            format!("device={}", self.device),
        ];
        if self.resume {
            args.push("resume=True".to_string());
        }
        args
    }

    /// Arguments for `yolo` to export the best weights of the run to ONNX.
    pub fn export_args(&self) -> Vec<String> {
        vec![
            "export".to_string(),
            format!("model={}", self.weights_dir().join("best.pt").display()),
            "format=onnx".to_string(),
            format!("imgsz={}", self.imgsz),
        ]
    }

    pub fn run(&self, dry_run: bool) -> anyhow::Result<()> {
        run_command(&self.args(), dry_run)
    }

    pub fn export(&self, dry_run: bool) -> anyhow::Result<()> {
        run_command(&self.export_args(), dry_run)
    }
}

fn run_command(args: &[String], dry_run: bool) -> anyhow::Result<()> {
    log::info!("{PROGRAM} {}", args.join(" "));
    if dry_run {
        return Ok(());
    }
    let status = Command::new(PROGRAM)
        .args(args)
        .status()
        .with_context(|| format!("Failed to launch `{PROGRAM}`, is ultralytics installed?"))?;
    anyhow::ensure!(status.success(), "`{PROGRAM} {}` failed: {status}", args[..2].join(" "));
    Ok(())
}
