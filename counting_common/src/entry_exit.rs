//! Per-frame orchestration of entry/exit counting.
//!
//! Every `reseed_interval` processed frames the detector runs and the
//! correlation trackers are reseeded from its boxes; on the frames in between
//! the correlation trackers are advanced instead. Either way the resulting
//! boxes go through the identity tracker and then the [LineCounter].

use std::time::Instant;

use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};

use crate::bbox::Bbox;
use crate::correlation::{CorrelationTrackers, DEFAULT_SEARCH_MARGIN};
use crate::detector::Detector;
use crate::frame_times::FrameTimes;
use crate::line_counter::{CountingLine, Counts, CrossingEvent, LineCounter, DEFAULT_HISTORY_LEN};
use crate::tracker::{IdentityTracker, TrackedObject};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryExitParams {
    pub reseed_interval: u64,
    /// Processed frames after which an unseen object is forgotten.
    pub max_idle: u64,
    pub history_len: usize,
    pub search_margin: u32,
}

impl Default for EntryExitParams {
    fn default() -> Self {
        Self {
            reseed_interval: 30,
            max_idle: 40,
            history_len: DEFAULT_HISTORY_LEN,
            search_margin: DEFAULT_SEARCH_MARGIN,
        }
    }
}

/// Everything that happened in one processed frame.
#[derive(Debug, Clone, Default)]
pub struct TrackedFrame {
    /// Boxes fed to the identity tracker.
    pub rects: Vec<Bbox>,
    pub objects: Vec<TrackedObject>,
    pub events: Vec<CrossingEvent>,
    pub counts: Counts,
    /// Whether the detector ran on this frame.
    pub detected: bool,
}

pub struct EntryExitCounter<D, T> {
    detector: D,
    identities: T,
    correlation: CorrelationTrackers,
    counter: LineCounter,
    params: EntryExitParams,
    processed: u64,
}

impl<D: Detector, T: IdentityTracker> EntryExitCounter<D, T> {
    pub fn new(detector: D, identities: T, line: CountingLine, params: EntryExitParams) -> Self {
        Self {
            detector,
            identities,
            correlation: CorrelationTrackers::new(params.search_margin),
            counter: LineCounter::new(line, params.history_len),
            params,
            processed: 0,
        }
    }

    pub fn counts(&self) -> Counts {
        self.counter.counts()
    }

    pub fn line(&self) -> &CountingLine {
        self.counter.line()
    }

    /// Number of frames processed so far.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn process(&mut self, frame: &RgbImage, times: &mut FrameTimes) -> anyhow::Result<TrackedFrame> {
        let index = self.processed;
        let gray = imageops::grayscale(frame);
        let detected = index % self.params.reseed_interval.max(1) == 0;

        let rects = if detected {
            let detections = self.detector.detect(frame, times)?;
            let start = Instant::now();
            let rects = self.correlation.reseed(&gray, &detections);
            times.tracking += start.elapsed();
            log::debug!(
                "Frame {index}: reseeded {} correlation trackers",
                self.correlation.len()
            );
            rects
        } else {
            let start = Instant::now();
            let rects = self.correlation.advance(&gray);
            times.tracking += start.elapsed();
            rects
        };

        let start = Instant::now();
        let objects = self.identities.update(&rects);
        times.tracking += start.elapsed();

        let start = Instant::now();
        let events = self.counter.update(&objects, index);
        let pruned = self.counter.prune(index, self.params.max_idle);
        if pruned > 0 {
            log::trace!("Frame {index}: forgot {pruned} idle objects");
        }
        times.counting = start.elapsed();

        for event in &events {
            log::info!(
                "Object {} crossed the line ({:?}) at frame {}",
                event.id,
                event.crossing,
                event.frame
            );
        }

        self.processed += 1;
        Ok(TrackedFrame {
            rects,
            objects,
            events,
            counts: self.counter.counts(),
            detected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    use crate::line_counter::Crossing;

    const PATCH: u32 = 20;

    fn frame_with_patch(x: u32, y: u32) -> RgbImage {
        let mut frame = RgbImage::new(200, 280);
        for py in 0..PATCH {
            for px in 0..PATCH {
                let value = ((px * 7 + py * 13) % 200 + 50) as u8;
                frame.put_pixel(x + px, y + py, Rgb([value, value, value]));
            }
        }
        frame
    }

    /// Boxes the non-black pixels of the frame, with a small border.
    struct BrightSpotDetector {
        calls: usize,
    }

    impl Detector for BrightSpotDetector {
        fn detect(&mut self, frame: &RgbImage, _times: &mut FrameTimes) -> anyhow::Result<Vec<Bbox>> {
            self.calls += 1;
            let lit: Vec<(u32, u32)> = frame
                .enumerate_pixels()
                .filter(|(_, _, p)| p[0] > 0)
                .map(|(x, y, _)| (x, y))
                .collect();
            if lit.is_empty() {
                return Ok(Vec::new());
            }
            let xmin = lit.iter().map(|p| p.0).min().unwrap_or(0) as f32;
            let ymin = lit.iter().map(|p| p.1).min().unwrap_or(0) as f32;
            let xmax = lit.iter().map(|p| p.0).max().unwrap_or(0) as f32 + 1.0;
            let ymax = lit.iter().map(|p| p.1).max().unwrap_or(0) as f32 + 1.0;
            Ok(vec![Bbox::new(xmin - 2.0, ymin - 2.0, xmax + 2.0, ymax + 2.0, 0.9, 0)])
        }
    }

    /// Identity is the position in the frame's box list.
    struct IndexIdentity;

    impl IdentityTracker for IndexIdentity {
        fn update(&mut self, rects: &[Bbox]) -> Vec<TrackedObject> {
            rects
                .iter()
                .enumerate()
                .map(|(i, bbox)| TrackedObject {
                    id: i as u64,
                    centroid: bbox.centroid(),
                    bbox: *bbox,
                })
                .collect()
        }
    }

    fn counter(reseed_interval: u64) -> EntryExitCounter<BrightSpotDetector, IndexIdentity> {
        EntryExitCounter::new(
            BrightSpotDetector { calls: 0 },
            IndexIdentity,
            CountingLine::for_height(280),
            EntryExitParams {
                reseed_interval,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_detector_runs_on_reseed_frames_only() {
        let mut counter = counter(5);
        let mut times = FrameTimes::default();
        let frame = frame_with_patch(90, 100);

        let detected: Vec<bool> = (0..11)
            .map(|_| counter.process(&frame, &mut times).unwrap().detected)
            .collect();

        assert_eq!(counter.detector.calls, 3);
        assert!(detected[0] && detected[5] && detected[10]);
        assert_eq!(detected.iter().filter(|d| **d).count(), 3);
        assert_eq!(counter.processed(), 11);
    }

    #[test]
    fn test_person_walking_up_exits_once() {
        let mut counter = counter(5);
        let mut times = FrameTimes::default();
        let mut events = Vec::new();

        for k in 0..40 {
            let frame = frame_with_patch(90, 200 - 4 * k);
            let tracked = counter.process(&frame, &mut times).unwrap();
            assert_eq!(tracked.rects.len(), 1);
            // Correlation trackers follow the patch between detections.
            let (_, cy) = tracked.rects[0].centroid();
            assert_eq!(cy, (200 - 4 * k + PATCH / 2) as f32);
            events.extend(tracked.events);
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].crossing, Crossing::Up);
        assert_eq!(counter.counts(), Counts { entered: 0, exited: 1 });
    }

    #[test]
    fn test_person_edging_down_enters_once() {
        let mut counter = counter(5);
        let mut times = FrameTimes::default();
        let mut events = Vec::new();

        // Waits with its centroid on the down limit, then creeps down a row per frame.
        for k in 0..40u32 {
            let y = 134 + k.saturating_sub(9);
            let frame = frame_with_patch(90, y);
            let tracked = counter.process(&frame, &mut times).unwrap();
            assert_eq!(tracked.rects.len(), 1);
            let (_, cy) = tracked.rects[0].centroid();
            assert_eq!(cy, (y + PATCH / 2) as f32);
            events.extend(tracked.events);
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].crossing, Crossing::Down);
        assert_eq!(events[0].frame, 10);
        assert_eq!(counter.counts(), Counts { entered: 1, exited: 0 });
    }

    #[test]
    fn test_empty_frames_count_nothing() {
        let mut counter = counter(30);
        let mut times = FrameTimes::default();
        let frame = RgbImage::new(200, 280);
        for _ in 0..45 {
            let tracked = counter.process(&frame, &mut times).unwrap();
            assert!(tracked.objects.is_empty());
        }
        assert_eq!(counter.counts(), Counts::default());
    }
}
