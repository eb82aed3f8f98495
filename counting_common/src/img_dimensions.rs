use serde::{Deserialize, Serialize};

/// Width and height of an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImgDimensions {
    pub width: f32,
    pub height: f32,
}

impl ImgDimensions {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Per-axis factors mapping coordinates in `self` onto `target`.
    pub fn scale_to(&self, target: ImgDimensions) -> (f32, f32) {
        (target.width / self.width, target.height / self.height)
    }
}
