//! Appearance-based single box trackers, used to carry detections between
//! full detection passes.
//!
//! Each tracker keeps the grayscale patch it was seeded with and looks for it
//! again, around its last known position, using `imageproc` normalized
//! cross-correlation template matching.

use image::imageops;
use image::GrayImage;
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};

use crate::bbox::Bbox;

/// Pixels searched around the last position, on each side.
pub const DEFAULT_SEARCH_MARGIN: u32 = 24;

#[derive(Debug, Clone)]
pub struct CorrelationTracker {
    template: GrayImage,
    bbox: Bbox,
    search_margin: u32,
    /// Correlation score of the latest match, 1.0 right after seeding.
    score: f32,
}

impl CorrelationTracker {
    /// Starts tracking `bbox` in `frame`.
    ///
    /// Returns `None` when the box, once clipped to the frame, is empty.
    pub fn start_track(frame: &GrayImage, bbox: Bbox, search_margin: u32) -> Option<Self> {
        let (x, y, w, h) = clip_rect(frame, bbox)?;
        let template = imageops::crop_imm(frame, x, y, w, h).to_image();

        let mut seeded = bbox;
        seeded.xmin = x as f32;
        seeded.ymin = y as f32;
        seeded.xmax = (x + w) as f32;
        seeded.ymax = (y + h) as f32;

        Some(Self {
            template,
            bbox: seeded,
            search_margin,
            score: 1.0,
        })
    }

    pub fn position(&self) -> Bbox {
        self.bbox
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    /// Advances the tracker by one frame and returns the updated position.
    ///
    /// The box keeps its size. When the search window does not fit the
    /// template (box pushed against the frame edge), the position is kept.
    pub fn update(&mut self, frame: &GrayImage) -> Bbox {
        let (tw, th) = self.template.dimensions();
        let (fw, fh) = frame.dimensions();
        if tw > fw || th > fh {
            return self.bbox;
        }

        let margin = self.search_margin as f32;
        let sx = (self.bbox.xmin - margin).max(0.0) as u32;
        let sy = (self.bbox.ymin - margin).max(0.0) as u32;
        let ex = ((self.bbox.xmin + tw as f32 + margin) as u32).min(fw);
        let ey = ((self.bbox.ymin + th as f32 + margin) as u32).min(fh);
        if ex.saturating_sub(sx) < tw || ey.saturating_sub(sy) < th {
            return self.bbox;
        }

        let region = imageops::crop_imm(frame, sx, sy, ex - sx, ey - sy).to_image();
        let scores = match_template(
            &region,
            &self.template,
            MatchTemplateMethod::CrossCorrelationNormalized,
        );
        let extremes = find_extremes(&scores);
        let (dx, dy) = extremes.max_value_location;

        let x = (sx + dx) as f32;
        let y = (sy + dy) as f32;
        self.bbox.xmin = x;
        self.bbox.ymin = y;
        self.bbox.xmax = x + tw as f32;
        self.bbox.ymax = y + th as f32;
        self.score = extremes.max_value;
        self.bbox
    }
}

/// Integer rect `(x, y, w, h)` of `bbox` clipped to `frame`.
fn clip_rect(frame: &GrayImage, bbox: Bbox) -> Option<(u32, u32, u32, u32)> {
    let (fw, fh) = frame.dimensions();
    let x1 = bbox.xmin.max(0.0).min(fw as f32) as u32;
    let y1 = bbox.ymin.max(0.0).min(fh as f32) as u32;
    let x2 = bbox.xmax.max(0.0).min(fw as f32) as u32;
    let y2 = bbox.ymax.max(0.0).min(fh as f32) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2 - x1, y2 - y1))
}

/// The set of correlation trackers active between detection passes.
#[derive(Debug, Default)]
pub struct CorrelationTrackers {
    trackers: Vec<CorrelationTracker>,
    search_margin: u32,
}

impl CorrelationTrackers {
    pub fn new(search_margin: u32) -> Self {
        Self {
            trackers: Vec::new(),
            search_margin,
        }
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Drops every active tracker and starts a new one per detection.
    /// Returns the detections that could be tracked.
    pub fn reseed(&mut self, frame: &GrayImage, detections: &[Bbox]) -> Vec<Bbox> {
        self.trackers.clear();
        for bbox in detections {
            if let Some(tracker) = CorrelationTracker::start_track(frame, *bbox, self.search_margin)
            {
                self.trackers.push(tracker);
            } else {
                log::debug!("Skipping degenerate detection {bbox:?}");
            }
        }
        self.trackers.iter().map(CorrelationTracker::position).collect()
    }

    /// Moves every tracker one frame forward, returning their new boxes.
    pub fn advance(&mut self, frame: &GrayImage) -> Vec<Bbox> {
        self.trackers
            .iter_mut()
            .map(|tracker| tracker.update(frame))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    const PATCH: u32 = 20;

    /// Black frame with a textured square at `(x, y)`.
    fn frame_with_patch(x: u32, y: u32) -> GrayImage {
        let mut frame = GrayImage::new(200, 120);
        for py in 0..PATCH {
            for px in 0..PATCH {
                let value = ((px * 7 + py * 13) % 200 + 50) as u8;
                frame.put_pixel(x + px, y + py, Luma([value]));
            }
        }
        frame
    }

    fn patch_box(x: u32, y: u32) -> Bbox {
        // Two pixels of black border around the patch.
        Bbox::new(
            x as f32 - 2.0,
            y as f32 - 2.0,
            (x + PATCH) as f32 + 2.0,
            (y + PATCH) as f32 + 2.0,
            0.9,
            0,
        )
    }

    #[test]
    fn test_tracker_follows_moving_patch() {
        let first = frame_with_patch(50, 40);
        let mut tracker = CorrelationTracker::start_track(&first, patch_box(50, 40), 16).unwrap();

        let moved = frame_with_patch(56, 44);
        let bbox = tracker.update(&moved);
        assert_eq!(bbox.xmin, 54.0);
        assert_eq!(bbox.ymin, 42.0);
        assert_eq!(bbox.width(), (PATCH + 4) as f32);
        assert_eq!(bbox.height(), (PATCH + 4) as f32);
        assert!(tracker.score() > 0.99);
    }

    #[test]
    fn test_degenerate_box_is_not_tracked() {
        let frame = frame_with_patch(50, 40);
        let outside = Bbox::new(300.0, 300.0, 320.0, 320.0, 0.9, 0);
        assert!(CorrelationTracker::start_track(&frame, outside, 16).is_none());
    }

    #[test]
    fn test_reseed_replaces_trackers() {
        let frame = frame_with_patch(50, 40);
        let mut trackers = CorrelationTrackers::new(16);

        let seeded = trackers.reseed(&frame, &[patch_box(50, 40), patch_box(120, 60)]);
        assert_eq!(seeded.len(), 2);
        assert_eq!(trackers.len(), 2);

        let seeded = trackers.reseed(&frame, &[patch_box(50, 40)]);
        assert_eq!(seeded.len(), 1);
        assert_eq!(trackers.len(), 1);
    }

    #[test]
    fn test_advance_returns_one_box_per_tracker() {
        let frame = frame_with_patch(50, 40);
        let mut trackers = CorrelationTrackers::new(16);
        trackers.reseed(&frame, &[patch_box(50, 40)]);

        let boxes = trackers.advance(&frame_with_patch(52, 40));
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].xmin, 50.0);
    }
}
