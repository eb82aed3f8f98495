use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::frame_meta::FrameMeta;
use crate::line_counter::{Counts, Crossing, CrossingEvent};

/// Metadata and results of one counting run over a video or camera stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountReport {
    /// Input file or camera device.
    pub input: String,
    /// Run mode, e.g. `crowd` or `track`.
    pub mode: String,
    pub width: u32,
    pub height: u32,
    /// Per-frame information with timestamps + people seen.
    pub frames: Vec<FrameMeta>,
    /// Line crossings, in order.
    pub events: Vec<CrossingEvent>,
    pub totals: Counts,
    pub elapsed_secs: f64,
    pub approx_fps: f64,
}

impl CountReport {
    pub fn new(input: impl Into<String>, mode: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            input: input.into(),
            mode: mode.into(),
            width,
            height,
            frames: Vec::new(),
            events: Vec::new(),
            totals: Counts::default(),
            elapsed_secs: 0.0,
            approx_fps: 0.0,
        }
    }

    pub fn push_frame(&mut self, frame: FrameMeta) {
        if let Some(counts) = frame.counts {
            self.totals = counts;
        }
        self.frames.push(frame);
    }

    pub fn push_events(&mut self, events: &[CrossingEvent]) {
        self.events.extend_from_slice(events);
    }

    /// Stamps run timing, with FPS over processed frames.
    pub fn finish(&mut self, elapsed_secs: f64) {
        self.elapsed_secs = elapsed_secs;
        self.approx_fps = if elapsed_secs > 0.0 {
            self.frames.len() as f64 / elapsed_secs
        } else {
            0.0
        };
    }

    pub fn peak_people(&self) -> usize {
        self.frames.iter().map(|f| f.people).max().unwrap_or(0)
    }

    pub fn mean_people(&self) -> f64 {
        if self.frames.is_empty() {
            return 0.0;
        }
        let total: usize = self.frames.iter().map(|f| f.people).sum();
        total as f64 / self.frames.len() as f64
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path).with_context(|| format!("Failed to create {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write report {path:?}"))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {path:?}"))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse report {path:?}"))
    }

    /// Human readable summary of the run.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Input:       {} ({}x{})", self.input, self.width, self.height);
        let _ = writeln!(out, "Mode:        {}", self.mode);
        let _ = writeln!(out, "Frames:      {}", self.frames.len());
        let _ = writeln!(out, "Elapsed:     {:.2} s", self.elapsed_secs);
        let _ = writeln!(out, "Approx. FPS: {:.2}", self.approx_fps);
        let _ = writeln!(out, "Peak people: {}", self.peak_people());
        let _ = writeln!(out, "Mean people: {:.2}", self.mean_people());
        if !self.events.is_empty() || self.totals != Counts::default() {
            let _ = writeln!(out, "Entered:     {}", self.totals.entered);
            let _ = writeln!(out, "Exited:      {}", self.totals.exited);
            let _ = writeln!(out, "Inside:      {}", self.totals.inside());
            for event in &self.events {
                let direction = match event.crossing {
                    Crossing::Up => "exit",
                    Crossing::Down => "enter",
                };
                let _ = writeln!(
                    out,
                    "  frame {:>6}  ID {:<5} {direction}",
                    event.frame, event.id
                );
            }
        }
        out
    }
}

/// Default report location next to the input, `<input>.counts.json`.
pub fn report_path_for(input: &Path) -> PathBuf {
    input.with_extension("counts.json")
}
