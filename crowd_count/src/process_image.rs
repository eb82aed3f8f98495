use std::path::{Path, PathBuf};

use anyhow::Context;
use counting_common::frame_meta::FrameMeta;
use counting_common::frame_times::FrameTimes;

use crate::modes::FrameProcessor;

/// Runs a processor once over a still image.
///
/// Writes the annotated image to `<input>.out.jpg` and the frame metadata to
/// `<input>.out.json`, and returns both paths.
pub fn process_image(
    path: &Path,
    processor: &mut dyn FrameProcessor,
) -> anyhow::Result<(PathBuf, PathBuf)> {
    let mut frame_times = FrameTimes::default();

    let mut img = image::open(path)
        .with_context(|| format!("Failed to open image {path:?}"))?
        .to_rgb8();
    let outcome = processor.process(&mut img, &mut frame_times)?;

    log::info!("{path:?}: {} people", outcome.people);
    // NB! For a single image, ort times will be misleading,
    // as the first time it's used, it does all kinds of lazy init.
    log::debug!("{frame_times:?}");

    let img_output_path = path.with_extension("out.jpg");
    img.save(&img_output_path)
        .with_context(|| format!("Failed to write {img_output_path:?}"))?;

    let meta_output_path = path.with_extension("out.json");
    let frame_meta = FrameMeta {
        frame_number: 0,
        timestamp_ms: 0,
        people: outcome.people,
        bboxes: outcome.bboxes,
        counts: outcome.counts,
    };
    serde_json::to_writer(std::fs::File::create(&meta_output_path)?, &frame_meta)?;

    Ok((img_output_path, meta_output_path))
}
