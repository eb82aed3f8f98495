//! The three ways a frame can be processed.

use std::fmt;
use std::time::Instant;

use ab_glyph::FontVec;
use counting_common::annotate::{self, GREEN, MAGENTA};
use counting_common::bbox::Bbox;
use counting_common::detector::Detector;
use counting_common::entry_exit::EntryExitCounter;
use counting_common::frame_times::FrameTimes;
use counting_common::line_counter::{Counts, CrossingEvent};
use counting_common::tracker::{IdentityTracker, SortIdentityTracker};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Draw a labelled box around every person.
    Recognize,
    /// Count the people in each frame.
    Crowd,
    /// Count people crossing a horizontal line.
    Track,
}

impl Mode {
    /// Track mode only looks at every 3rd frame.
    pub fn default_stride(self) -> u64 {
        match self {
            Mode::Recognize | Mode::Crowd => 1,
            Mode::Track => 3,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Recognize => "recognize",
            Mode::Crowd => "crowd",
            Mode::Track => "track",
        };
        f.write_str(name)
    }
}

/// Result of processing a single frame.
#[derive(Debug, Clone, Default)]
pub struct FrameOutcome {
    pub people: usize,
    pub bboxes: Vec<Bbox>,
    /// Running totals, track mode only.
    pub counts: Option<Counts>,
    pub events: Vec<CrossingEvent>,
}

/// Runs one mode over frames, drawing its overlays in place.
pub trait FrameProcessor {
    fn mode(&self) -> Mode;
    fn process(&mut self, frame: &mut RgbImage, times: &mut FrameTimes) -> anyhow::Result<FrameOutcome>;
}

pub struct RecognizeProcessor<D> {
    detector: D,
    font: Option<FontVec>,
}

impl<D: Detector> RecognizeProcessor<D> {
    pub fn new(detector: D, font: Option<FontVec>) -> Self {
        Self { detector, font }
    }
}

impl<D: Detector> FrameProcessor for RecognizeProcessor<D> {
    fn mode(&self) -> Mode {
        Mode::Recognize
    }

    fn process(&mut self, frame: &mut RgbImage, times: &mut FrameTimes) -> anyhow::Result<FrameOutcome> {
        let bboxes = self.detector.detect(frame, times)?;

        let start = Instant::now();
        annotate::draw_boxes(frame, &bboxes, MAGENTA, Some("person"), self.font.as_ref());
        times.annotation = start.elapsed();

        Ok(FrameOutcome {
            people: bboxes.len(),
            bboxes,
            ..Default::default()
        })
    }
}

pub struct CrowdProcessor<D> {
    detector: D,
    font: Option<FontVec>,
}

impl<D: Detector> CrowdProcessor<D> {
    pub fn new(detector: D, font: Option<FontVec>) -> Self {
        Self { detector, font }
    }
}

impl<D: Detector> FrameProcessor for CrowdProcessor<D> {
    fn mode(&self) -> Mode {
        Mode::Crowd
    }

    fn process(&mut self, frame: &mut RgbImage, times: &mut FrameTimes) -> anyhow::Result<FrameOutcome> {
        let bboxes = self.detector.detect(frame, times)?;

        let start = Instant::now();
        let font = self.font.as_ref();
        annotate::draw_boxes(frame, &bboxes, GREEN, None, font);
        annotate::draw_banner(frame, &format!("Total People: {}", bboxes.len()), font);
        times.annotation = start.elapsed();

        Ok(FrameOutcome {
            people: bboxes.len(),
            bboxes,
            ..Default::default()
        })
    }
}

pub struct TrackProcessor<D, T> {
    counter: EntryExitCounter<D, T>,
    font: Option<FontVec>,
}

impl<D: Detector, T: IdentityTracker> TrackProcessor<D, T> {
    pub fn new(counter: EntryExitCounter<D, T>, font: Option<FontVec>) -> Self {
        Self { counter, font }
    }
}

impl<D: Detector, T: IdentityTracker> FrameProcessor for TrackProcessor<D, T> {
    fn mode(&self) -> Mode {
        Mode::Track
    }

    fn process(&mut self, frame: &mut RgbImage, times: &mut FrameTimes) -> anyhow::Result<FrameOutcome> {
        let tracked = self.counter.process(frame, times)?;

        let start = Instant::now();
        let font = self.font.as_ref();
        let counts = tracked.counts;
        annotate::draw_counting_line(frame, self.counter.line().draw_y, MAGENTA);
        annotate::draw_boxes(frame, &tracked.rects, GREEN, None, font);
        annotate::draw_tracked_objects(frame, &tracked.objects, font);
        annotate::draw_status(
            frame,
            &[
                ("Exit", counts.exited),
                ("Enter", counts.entered),
                ("Inside", counts.inside()),
            ],
            font,
        );
        times.annotation = start.elapsed();

        Ok(FrameOutcome {
            people: tracked.objects.len(),
            bboxes: tracked.rects,
            counts: Some(counts),
            events: tracked.events,
        })
    }
}

/// Processor for `mode` with its parameters taken from `config`.
pub fn build_processor<D>(
    mode: Mode,
    detector: D,
    config: &AppConfig,
    font: Option<FontVec>,
) -> Box<dyn FrameProcessor + Send>
where
    D: Detector + Send + 'static,
{
    match mode {
        Mode::Recognize => Box::new(RecognizeProcessor::new(detector, font)),
        Mode::Crowd => Box::new(CrowdProcessor::new(detector, font)),
        Mode::Track => {
            let counter = EntryExitCounter::new(
                detector,
                SortIdentityTracker::new(config.max_disappeared),
                config.counting_line(),
                config.entry_exit_params(),
            );
            Box::new(TrackProcessor::new(counter, font))
        }
    }
}
