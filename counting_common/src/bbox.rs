use serde::{Deserialize, Serialize};

use crate::img_dimensions::ImgDimensions;

/// Axis-aligned bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub confidence: f32,
    /// Index into [crate::coco_classes::NAMES].
    pub class: usize,
    /// Identity assigned by the tracker, if any.
    pub tracker_id: Option<i64>,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32, confidence: f32, class: usize) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            confidence,
            class,
            tracker_id: None,
        }
    }

    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, confidence: f32, class: usize) -> Self {
        Self::new(
            cx - w / 2.0,
            cy - h / 2.0,
            cx + w / 2.0,
            cy + h / 2.0,
            confidence,
            class,
        )
    }

    pub fn width(&self) -> f32 {
        (self.xmax - self.xmin).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.ymax - self.ymin).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn centroid(&self) -> (f32, f32) {
        (
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
        )
    }

    pub fn iou(&self, other: &Bbox) -> f32 {
        let x1 = self.xmin.max(other.xmin);
        let y1 = self.ymin.max(other.ymin);
        let x2 = self.xmax.min(other.xmax);
        let y2 = self.ymax.min(other.ymax);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Clamps coordinates into `[0, dims]`.
    pub fn clamp_to(mut self, dims: ImgDimensions) -> Self {
        self.xmin = self.xmin.max(0.0).min(dims.width);
        self.ymin = self.ymin.max(0.0).min(dims.height);
        self.xmax = self.xmax.max(0.0).min(dims.width);
        self.ymax = self.ymax.max(0.0).min(dims.height);
        self
    }
}

/// Greedy non-maximum suppression.
///
/// Boxes are visited in descending confidence order; a box survives unless it
/// overlaps an already kept box by at least `iou_threshold`. Equal confidences
/// keep their input order.
pub fn nms(mut bboxes: Vec<Bbox>, iou_threshold: f32) -> Vec<Bbox> {
    bboxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Bbox> = Vec::with_capacity(bboxes.len());
    for candidate in bboxes {
        if keep.iter().all(|kept| kept.iou(&candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
