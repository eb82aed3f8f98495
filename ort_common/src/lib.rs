//! YOLOv8-style person detector running on onnxruntime.

use std::time::Instant;

use anyhow::Context;
use counting_common::bbox::{Bbox, nms};
use counting_common::coco_classes::PERSON;
use counting_common::detector::Detector;
use counting_common::frame_times::FrameTimes;
use counting_common::img_dimensions::ImgDimensions;
use fast_image_resize as fr;
use image::RgbImage;
use ndarray::{Array4, CowArray};
use ort::session::Session;
use ort::value::TensorRef;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorParams {
    /// Side of the square model input.
    pub input_size: u32,
    pub conf_threshold: f32,
    pub nms_threshold: f32,
    /// COCO class indices to keep.
    pub classes: Vec<usize>,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            conf_threshold: 0.5,
            nms_threshold: 0.45,
            classes: vec![PERSON],
        }
    }
}

pub struct PersonDetector {
    session: Session,
    params: DetectorParams,
    resizer: fr::Resizer,
}

impl PersonDetector {
    pub fn new(session: Session, params: DetectorParams) -> Self {
        Self {
            session,
            params,
            resizer: fr::Resizer::new(),
        }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Resizes the frame to the model input and lays it out as NCHW in `[0, 1]`.
    fn preprocess(&mut self, frame: &RgbImage) -> anyhow::Result<Array4<f32>> {
        let size = self.params.input_size;
        let src = fr::images::ImageRef::new(
            frame.width(),
            frame.height(),
            frame.as_raw(),
            fr::PixelType::U8x3,
        )
        .context("Failed to wrap frame for resizing")?;
        let mut dst = fr::images::Image::new(size, size, fr::PixelType::U8x3);
        let options =
            fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .context("Failed to resize frame to model input")?;

        Ok(to_nchw(dst.buffer(), size as usize))
    }
}

fn to_nchw(rgb: &[u8], size: usize) -> Array4<f32> {
    let mut input = Array4::<f32>::zeros((1, 3, size, size));
    for (i, pixel) in rgb.chunks_exact(3).enumerate() {
        let (y, x) = (i / size, i % size);
        for (c, value) in pixel.iter().enumerate() {
            input[[0, c, y, x]] = *value as f32 / 255.0;
        }
    }
    input
}

/// Decodes a `[1, 4 + C, N]` output into frame-space boxes, then applies NMS.
///
/// Each of the N columns holds `cx, cy, w, h` followed by one score per class.
/// A column yields at most one box, for the best scoring requested class.
/// `scale` maps model input coordinates onto the frame.
pub fn decode_output(
    data: &[f32],
    shape: &[usize],
    params: &DetectorParams,
    scale: (f32, f32),
) -> anyhow::Result<Vec<Bbox>> {
    let candidates = decode_candidates(data, shape, params, scale)?;
    Ok(nms(candidates, params.nms_threshold))
}

fn decode_candidates(
    data: &[f32],
    shape: &[usize],
    params: &DetectorParams,
    scale: (f32, f32),
) -> anyhow::Result<Vec<Bbox>> {
    let [_, rows, anchors] = shape else {
        anyhow::bail!("Unexpected output shape {shape:?}, expected [1, 4 + C, N]");
    };
    let (rows, anchors) = (*rows, *anchors);
    if rows < 5 || data.len() < rows * anchors {
        anyhow::bail!(
            "Output of {} values does not fit shape {shape:?}",
            data.len()
        );
    }
    let num_classes = rows - 4;
    let at = |row: usize, i: usize| data[row * anchors + i];

    let mut bboxes = Vec::new();
    for i in 0..anchors {
        let best = params
            .classes
            .iter()
            .filter(|class| **class < num_classes)
            .map(|class| (*class, at(4 + class, i)))
            .fold(None, |best: Option<(usize, f32)>, (class, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((class, score)),
            });
        let Some((class, confidence)) = best else {
            continue;
        };
        if confidence < params.conf_threshold {
            continue;
        }
        let (sx, sy) = scale;
        bboxes.push(Bbox::from_center(
            at(0, i) * sx,
            at(1, i) * sy,
            at(2, i) * sx,
            at(3, i) * sy,
            confidence,
            class,
        ));
    }

    Ok(bboxes)
}

impl Detector for PersonDetector {
    fn detect(&mut self, frame: &RgbImage, times: &mut FrameTimes) -> anyhow::Result<Vec<Bbox>> {
        let frame_dims = ImgDimensions::new(frame.width() as f32, frame.height() as f32);
        let model_dims =
            ImgDimensions::new(self.params.input_size as f32, self.params.input_size as f32);

        let start = Instant::now();
        let input = self.preprocess(frame)?;
        times.resize += start.elapsed();

        let start = Instant::now();
        let input = CowArray::from(input).into_dyn();
        let inputs = ort::inputs![TensorRef::from_array_view(&input)?];
        times.to_tensor += start.elapsed();

        let start = Instant::now();
        let outputs = self.session.run(inputs)?;
        times.forward_pass += start.elapsed();

        let start = Instant::now();
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let shape: Vec<usize> = shape.iter().map(|d| *d as usize).collect();
        let candidates =
            decode_candidates(data, &shape, &self.params, model_dims.scale_to(frame_dims))?;
        times.bbox_extraction += start.elapsed();

        let start = Instant::now();
        let bboxes = nms(candidates, self.params.nms_threshold);
        times.nms += start.elapsed();

        log::trace!("Detected {} boxes", bboxes.len());
        Ok(bboxes
            .into_iter()
            .map(|bbox| bbox.clamp_to(frame_dims))
            .collect())
    }
}
