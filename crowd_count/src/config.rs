use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use counting_common::entry_exit::EntryExitParams;
use counting_common::line_counter::CountingLine;
use ort_common::DetectorParams;
use serde::{Deserialize, Serialize};

use crate::modes::Mode;

/// Tunables of a run, loaded from an optional JSON file.
///
/// Every field has a default, so a config file only needs the fields it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Frames are scaled to this size before processing.
    pub width: u32,
    pub height: u32,
    pub input_size: u32,
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// Process every n-th frame. Unset means the mode's default.
    pub stride: Option<u64>,
    pub reseed_interval: u64,
    pub max_disappeared: usize,
    pub max_idle: u64,
    pub history_len: usize,
    pub search_margin: u32,
    /// Line offsets from the middle row of the processed frame.
    pub up_offset: f32,
    pub down_offset: f32,
    pub draw_offset: f32,
    pub max_down_step: Option<f32>,
    pub max_runtime_secs: u64,
    /// Frame rate of displayed and saved output.
    pub output_fps: u32,
    /// TTF/OTF font for overlay text.
    pub font: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let line = CountingLine::for_height(280);
        let entry_exit = EntryExitParams::default();
        let detector = DetectorParams::default();
        Self {
            width: 500,
            height: 280,
            input_size: detector.input_size,
            conf_threshold: detector.conf_threshold,
            nms_threshold: detector.nms_threshold,
            stride: None,
            reseed_interval: entry_exit.reseed_interval,
            max_disappeared: 40,
            max_idle: entry_exit.max_idle,
            history_len: entry_exit.history_len,
            search_margin: entry_exit.search_margin,
            up_offset: -20.0,
            down_offset: 4.0,
            draw_offset: -10.0,
            max_down_step: line.max_down_step,
            max_runtime_secs: 28_800,
            output_fps: 10,
            font: None,
        }
    }
}

impl AppConfig {
    /// Reads a JSON config. A path that does not exist yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::info!("No config at {path:?}, using defaults");
            return Ok(Self::default());
        }
        let text =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {path:?}"))?;
        let config: Self =
            serde_json::from_str(&text).with_context(|| format!("Invalid config {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.width > 0 && self.height > 0,
            "Processing size must be non-zero, got {}x{}",
            self.width,
            self.height
        );
        anyhow::ensure!(self.input_size > 0, "Model input size must be non-zero");
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.conf_threshold),
            "Confidence threshold must be in [0, 1], got {}",
            self.conf_threshold
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.nms_threshold),
            "NMS threshold must be in [0, 1], got {}",
            self.nms_threshold
        );
        anyhow::ensure!(self.stride != Some(0), "Stride must be at least 1");
        anyhow::ensure!(self.output_fps > 0, "Output fps must be non-zero");
        Ok(())
    }

    pub fn stride_for(&self, mode: Mode) -> u64 {
        self.stride.unwrap_or_else(|| mode.default_stride()).max(1)
    }

    pub fn counting_line(&self) -> CountingLine {
        CountingLine {
            max_down_step: self.max_down_step,
            ..CountingLine::with_offsets(self.height, self.up_offset, self.down_offset, self.draw_offset)
        }
    }

    pub fn entry_exit_params(&self) -> EntryExitParams {
        EntryExitParams {
            reseed_interval: self.reseed_interval,
            max_idle: self.max_idle,
            history_len: self.history_len,
            search_margin: self.search_margin,
        }
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            input_size: self.input_size,
            conf_threshold: self.conf_threshold,
            nms_threshold: self.nms_threshold,
            ..DetectorParams::default()
        }
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.max_runtime_secs)
    }

    /// Name/value pairs shown in the dashboard's parameter panel.
    pub fn parameters(&self, mode: Mode) -> Vec<(&'static str, String)> {
        let line = self.counting_line();
        let mut params = vec![
            ("Mode", mode.to_string()),
            ("Frame size", format!("{}x{}", self.width, self.height)),
            ("Confidence", format!("{:.2}", self.conf_threshold)),
            ("NMS IoU", format!("{:.2}", self.nms_threshold)),
            ("Stride", self.stride_for(mode).to_string()),
            ("Max runtime", format!("{} s", self.max_runtime_secs)),
        ];
        if mode == Mode::Track {
            params.extend([
                ("Reseed every", format!("{} frames", self.reseed_interval)),
                ("Max disappeared", self.max_disappeared.to_string()),
                ("Line (drawn)", format!("y = {}", line.draw_y)),
                ("Exit above", format!("y < {}", line.up_limit)),
                ("Enter below", format!("y > {}", line.down_limit)),
                (
                    "Max down step",
                    line.max_down_step
                        .map_or_else(|| "none".to_string(), |step| step.to_string()),
                ),
            ]);
        }
        params
    }
}
