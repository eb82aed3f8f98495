//! Identity assignment across frames.
//!
//! The counting rules only need a stable integer identity plus a centroid for
//! every box in a frame; how identities are matched is left to the `similari`
//! SORT tracker.

use similari::prelude::PositionalMetricType::IoU;
use similari::prelude::{Sort, SortTrack, Universal2DBox};
use similari::trackers::sort::metric::DEFAULT_MINIMAL_SORT_CONFIDENCE;
use similari::trackers::sort::DEFAULT_SORT_IOU_THRESHOLD;

use crate::bbox::Bbox;
use crate::coco_classes;

/// A box with the identity assigned to it in the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedObject {
    pub id: u64,
    pub centroid: (f32, f32),
    pub bbox: Bbox,
}

/// Assigns stable identities to per-frame boxes.
pub trait IdentityTracker {
    fn update(&mut self, rects: &[Bbox]) -> Vec<TrackedObject>;
}

/// [IdentityTracker] backed by a SORT tracker.
pub struct SortIdentityTracker {
    sort: Sort,
}

impl SortIdentityTracker {
    /// `max_disappeared` is the number of frames an identity survives
    /// without a matching box.
    pub fn new(max_disappeared: usize) -> Self {
        Self {
            sort: Sort::new(
                1,
                1,
                max_disappeared,
                IoU(DEFAULT_SORT_IOU_THRESHOLD),
                DEFAULT_MINIMAL_SORT_CONFIDENCE,
                None,
                1.0 / 20.0,
                1.0 / 160.0,
            ),
        }
    }
}

impl Default for SortIdentityTracker {
    fn default() -> Self {
        Self::new(40)
    }
}

impl IdentityTracker for SortIdentityTracker {
    fn update(&mut self, rects: &[Bbox]) -> Vec<TrackedObject> {
        let observations: Vec<_> = rects
            .iter()
            .map(|bbox| {
                (
                    Universal2DBox::ltwh(bbox.xmin, bbox.ymin, bbox.width(), bbox.height()),
                    Some(bbox.class as i64),
                )
            })
            .collect();
        let tracks = self.sort.predict(&observations);
        log::trace!("{tracks:?}");
        tracks.iter().map(track_to_object).collect()
    }
}

/// Counting follows the detector, so the box and centroid come from the
/// observation matched this frame rather than the Kalman prediction.
fn track_to_object(track: &SortTrack) -> TrackedObject {
    let tracked = &track.observed_bbox;
    let cx = tracked.xc;
    let cy = tracked.yc;
    let h = tracked.height;
    let w = tracked.aspect * h;

    // We use similari custom object id support for class ids.
    let class = track
        .custom_object_id
        .map(|id| id as usize)
        .unwrap_or(coco_classes::PERSON);

    let mut bbox = Bbox::from_center(cx, cy, w, h, tracked.confidence, class);
    bbox.tracker_id = Some(track.id as i64);

    TrackedObject {
        id: track.id,
        centroid: (cx, cy),
        bbox,
    }
}
