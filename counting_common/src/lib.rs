//! Shared types and counting rules for crowd counting on video streams.

pub mod annotate;
pub mod bbox;
pub mod coco_classes;
pub mod correlation;
pub mod detector;
pub mod entry_exit;
pub mod frame_meta;
pub mod frame_times;
pub mod img_dimensions;
pub mod line_counter;
pub mod tracker;
pub mod video_meta;
