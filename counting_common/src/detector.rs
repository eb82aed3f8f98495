use image::RgbImage;

use crate::bbox::Bbox;
use crate::frame_times::FrameTimes;

/// Produces person boxes for a frame, in that frame's pixel coordinates.
pub trait Detector {
    fn detect(&mut self, frame: &RgbImage, times: &mut FrameTimes) -> anyhow::Result<Vec<Bbox>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &RgbImage, times: &mut FrameTimes) -> anyhow::Result<Vec<Bbox>> {
        (**self).detect(frame, times)
    }
}
