//! Frame and crop primitives.
//!
//! - `Frame`: Owned RGB24 bitmap plus a monotonically increasing index.
//! - `BoundingBox`: Pixel-space detection box with margin expansion and clamping.
//! - `CropImage`: A rectangular sub-region extracted from a frame.
//!
//! Frames are produced by the ingest layer, handed to the detection stage by
//! value through a bounded queue, and discarded after detection. Crops own
//! their pixels so they can outlive the frame they came from.

use anyhow::{anyhow, Result};

/// Bytes per RGB24 pixel.
const BYTES_PER_PIXEL: usize = 3;

/// Owned RGB24 frame.
#[derive(Clone)]
pub struct Frame {
    /// Tightly packed RGB24 rows, `width * height * 3` bytes.
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Position of this frame in the source stream, starting at 0.
    pub index: u64,
}

impl Frame {
    /// Create a frame from tightly packed RGB24 pixels. Called by the ingest layer.
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Extract the sub-region covered by `region`, clamped to frame bounds.
    ///
    /// Returns `None` when the clamped region is empty.
    pub fn crop(&self, region: BoundingBox) -> Option<CropImage> {
        let region = region.clamp_to(self.width, self.height);
        let (w, h) = (region.width(), region.height());
        if w == 0 || h == 0 {
            return None;
        }

        let row_bytes = w as usize * BYTES_PER_PIXEL;
        let stride = self.width as usize * BYTES_PER_PIXEL;
        let mut data = Vec::with_capacity(row_bytes * h as usize);
        for row in region.y1..region.y2 {
            let start = row as usize * stride + region.x1 as usize * BYTES_PER_PIXEL;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        Some(CropImage {
            data,
            width: w,
            height: h,
        })
    }
}

/// Pixel-space box, `x2`/`y2` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    /// Grow the box by `margin` pixels on every side.
    pub fn expand(self, margin: i32) -> Self {
        Self {
            x1: self.x1 - margin,
            y1: self.y1 - margin,
            x2: self.x2 + margin,
            y2: self.y2 + margin,
        }
    }

    /// Clamp the box to a `width` x `height` frame.
    pub fn clamp_to(self, width: u32, height: u32) -> Self {
        Self {
            x1: self.x1.clamp(0, width as i32),
            y1: self.y1.clamp(0, height as i32),
            x2: self.x2.clamp(0, width as i32),
            y2: self.y2.clamp(0, height as i32),
        }
    }
}

/// Owned crop extracted from a frame.
#[derive(Clone)]
pub struct CropImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl CropImage {
    /// True when both dimensions reach `min` pixels.
    pub fn is_at_least(&self, min: u32) -> bool {
        self.width >= min && self.height >= min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
        let data = vec![value; (width * height * 3) as usize];
        Frame::new(data, width, height, 0).expect("frame")
    }

    #[test]
    fn frame_rejects_wrong_buffer_size() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, 0).is_err());
    }

    #[test]
    fn expand_then_clamp_stays_in_bounds() {
        let b = BoundingBox::new(2, 2, 98, 98).expand(5).clamp_to(100, 100);
        assert_eq!(b, BoundingBox::new(0, 0, 100, 100));
    }

    #[test]
    fn crop_extracts_expected_region() {
        let frame = solid_frame(10, 10, 7);
        let crop = frame.crop(BoundingBox::new(2, 3, 6, 8)).expect("crop");
        assert_eq!(crop.width, 4);
        assert_eq!(crop.height, 5);
        assert_eq!(crop.data.len(), 4 * 5 * 3);
        assert!(crop.data.iter().all(|&p| p == 7));
    }

    #[test]
    fn crop_outside_frame_is_none() {
        let frame = solid_frame(10, 10, 0);
        assert!(frame.crop(BoundingBox::new(20, 20, 30, 30)).is_none());
    }

    #[test]
    fn crop_size_threshold() {
        let frame = solid_frame(100, 100, 0);
        let crop = frame.crop(BoundingBox::new(0, 0, 40, 25)).expect("crop");
        assert!(crop.is_at_least(25));
        assert!(!crop.is_at_least(30));
    }
}
