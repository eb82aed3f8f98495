//! Overlays drawn onto processed frames.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;

use crate::bbox::Bbox;
use crate::tracker::TrackedObject;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const MAGENTA: Rgb<u8> = Rgb([255, 0, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

const TEXT_SCALE: f32 = 14.0;

/// Loads a TTF/OTF font for text overlays.
///
/// Overlays still draw shapes without a font, so failures only warn.
pub fn load_font(path: &Path) -> Option<FontVec> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::warn!("Could not read font {path:?}, text overlays disabled: {err}");
            return None;
        }
    };
    match FontVec::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(err) => {
            log::warn!("Invalid font {path:?}, text overlays disabled: {err}");
            None
        }
    }
}

fn draw_label(img: &mut RgbImage, font: Option<&FontVec>, color: Rgb<u8>, x: i32, y: i32, text: &str) {
    if let Some(font) = font {
        draw_text_mut(img, color, x, y, PxScale::from(TEXT_SCALE), font, text);
    }
}

/// Draws a hollow rectangle per box, with an optional label above it.
pub fn draw_boxes(
    img: &mut RgbImage,
    bboxes: &[Bbox],
    color: Rgb<u8>,
    label: Option<&str>,
    font: Option<&FontVec>,
) {
    for bbox in bboxes {
        let w = bbox.width() as u32;
        let h = bbox.height() as u32;
        if w == 0 || h == 0 {
            continue;
        }
        let rect = Rect::at(bbox.xmin as i32, bbox.ymin as i32).of_size(w, h);
        draw_hollow_rect_mut(img, rect, color);
        if let Some(label) = label {
            draw_label(
                img,
                font,
                color,
                bbox.xmin as i32,
                bbox.ymin as i32 - TEXT_SCALE as i32,
                label,
            );
        }
    }
}

/// Horizontal line across the full frame width.
pub fn draw_counting_line(img: &mut RgbImage, y: f32, color: Rgb<u8>) {
    let width = img.width() as f32;
    draw_line_segment_mut(img, (0.0, y), (width, y), color);
    draw_line_segment_mut(img, (0.0, y + 1.0), (width, y + 1.0), color);
}

/// `ID n` label and a centroid dot per tracked object.
pub fn draw_tracked_objects(img: &mut RgbImage, objects: &[TrackedObject], font: Option<&FontVec>) {
    for object in objects {
        let (cx, cy) = (object.centroid.0 as i32, object.centroid.1 as i32);
        draw_label(
            img,
            font,
            WHITE,
            cx - 10,
            cy - 10 - TEXT_SCALE as i32,
            &format!("ID {}", object.id),
        );
        draw_filled_circle_mut(img, (cx, cy), 4, WHITE);
    }
}

/// `key: value` lines stacked upwards from the bottom-left corner.
pub fn draw_status(img: &mut RgbImage, entries: &[(&str, u64)], font: Option<&FontVec>) {
    let height = img.height() as i32;
    for (i, (key, value)) in entries.iter().enumerate() {
        let y = height - (i as i32 * 20 + 20) - TEXT_SCALE as i32 / 2;
        draw_label(img, font, BLACK, 10, y, &format!("{key}: {value}"));
    }
}

/// Single line of text in the top-left corner.
pub fn draw_banner(img: &mut RgbImage, text: &str, font: Option<&FontVec>) {
    draw_label(img, font, BLACK, 10, 6, text);
}
