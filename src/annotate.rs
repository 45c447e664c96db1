//! Overlay rendering for the live preview.
//!
//! Draws vehicle boxes colored by class, with a thicker border and a
//! highlighted label background when a live plate match exists, and encodes
//! the result as JPEG for the preview stream.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageBuffer, Rgb};

use crate::detect::VehicleDetection;
use crate::frame::Frame;
use crate::registry::LivePlate;

const GLYPH_ADVANCE: i32 = 6;
const LABEL_HEIGHT: i32 = 12;
const PLATE_HIGHLIGHT: Rgb<u8> = Rgb([255, 255, 0]);
const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const PREVIEW_JPEG_QUALITY: u8 = 80;

type RgbImage = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Render the current detection set and live plate registry onto a frame.
pub fn annotate_frame(
    frame: &Frame,
    detections: &[VehicleDetection],
    live_plates: &HashMap<String, LivePlate>,
) -> Result<RgbImage> {
    let mut image = RgbImage::from_vec(frame.width, frame.height, frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;

    for detection in detections {
        let bbox = detection.bbox.clamp_to(frame.width, frame.height);
        let plate = live_plates.get(&detection.vehicle_id);
        let color = Rgb(detection.class.color());
        let thickness = if plate.is_some() { 4 } else { 3 };

        for inset in 0..thickness {
            draw_rectangle(
                &mut image,
                bbox.x1 + inset,
                bbox.y1 + inset,
                bbox.x2 - 1 - inset,
                bbox.y2 - 1 - inset,
                color,
            );
        }

        let text = label_text(detection, plate);
        let background = if plate.is_some() {
            PLATE_HIGHLIGHT
        } else {
            color
        };
        let label_x = bbox.x1;
        let label_y = (bbox.y1 - LABEL_HEIGHT).max(0);
        let text_width = text.chars().count() as i32 * GLYPH_ADVANCE;
        fill_rect(
            &mut image,
            label_x,
            label_y,
            label_x + text_width + 4,
            label_y + LABEL_HEIGHT - 1,
            background,
        );
        draw_label(&mut image, label_x + 2, label_y + 2, &text, LABEL_TEXT_COLOR);
    }

    Ok(image)
}

/// `"<class> NN%"`, extended with the plate confidence on a live match.
pub fn label_text(detection: &VehicleDetection, plate: Option<&LivePlate>) -> String {
    let mut text = format!(
        "{} {}%",
        detection.class.label(),
        (detection.confidence * 100.0) as u32
    );
    if let Some(plate) = plate {
        text.push_str(&format!(" | plate: {}%", (plate.confidence * 100.0) as u32));
    }
    text
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, PREVIEW_JPEG_QUALITY)
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if left > right || top > bottom {
        return;
    }
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for x in left..=right {
        *image.get_pixel_mut(x as u32, top as u32) = color;
        *image.get_pixel_mut(x as u32, bottom as u32) = color;
    }
    for y in top..=bottom {
        *image.get_pixel_mut(left as u32, y as u32) = color;
        *image.get_pixel_mut(right as u32, y as u32) = color;
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let left = left.clamp(0, width.saturating_sub(1));
    let right = right.clamp(0, width.saturating_sub(1));
    let top = top.clamp(0, height.saturating_sub(1));
    let bottom = bottom.clamp(0, height.saturating_sub(1));

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

fn draw_label(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = x + col;
                        if px >= 0 && px < width {
                            *image.get_pixel_mut(px as u32, py as u32) = color;
                        }
                    }
                }
            }
        }
        x += GLYPH_ADVANCE;
    }
}

/// 5x7 glyphs for the characters the labels can produce.
fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    match ch {
        'A' => Some([
            0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001,
        ]),
        'B' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110,
        ]),
        'C' => Some([
            0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110,
        ]),
        'E' => Some([
            0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'K' => Some([
            0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001,
        ]),
        'L' => Some([
            0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111,
        ]),
        'P' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000,
        ]),
        'R' => Some([
            0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001,
        ]),
        'S' => Some([
            0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        'T' => Some([
            0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        'U' => Some([
            0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110,
        ]),
        '0' => Some([
            0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110,
        ]),
        '1' => Some([
            0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110,
        ]),
        '2' => Some([
            0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111,
        ]),
        '3' => Some([
            0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110,
        ]),
        '4' => Some([
            0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010,
        ]),
        '5' => Some([
            0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110,
        ]),
        '6' => Some([
            0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110,
        ]),
        '7' => Some([
            0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000,
        ]),
        '8' => Some([
            0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110,
        ]),
        '9' => Some([
            0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100,
        ]),
        '%' => Some([
            0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011,
        ]),
        ':' => Some([
            0b00000, 0b00100, 0b00100, 0b00000, 0b00100, 0b00100, 0b00000,
        ]),
        '|' => Some([
            0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100,
        ]),
        _ => None,
    }
}
