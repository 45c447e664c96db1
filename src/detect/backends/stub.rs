use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::{PlateDetector, VehicleDetector, MIN_PLATE_CROP_DIM};
use crate::detect::result::{PlateDetection, VehicleClass, VehicleDetection};
use crate::frame::{BoundingBox, CropImage, Frame};

/// Stub vehicle detector for demo runs and tests.
///
/// Derives detections from a pixel hash, so the output is deterministic for a
/// given frame content while still varying across a synthetic stream. Honors
/// the real detector contract: classes of interest only, boxes no smaller
/// than `min_box_size`.
pub struct StubVehicleDetector {
    min_box_size: u32,
}

impl StubVehicleDetector {
    pub fn new() -> Self {
        Self { min_box_size: 100 }
    }
}

impl Default for StubVehicleDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl VehicleDetector for StubVehicleDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<VehicleDetection>> {
        let hash: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let count = (hash[0] % 3) as usize;

        let mut vehicles = Vec::with_capacity(count);
        for i in 0..count {
            let seed = &hash[i * 8..i * 8 + 8];
            let side = self.min_box_size + 20 * (seed[2] % 4) as u32;
            if side >= frame.width || side >= frame.height {
                continue;
            }
            let x1 = (seed[0] as u32 * 7) % (frame.width - side);
            let y1 = (seed[1] as u32 * 7) % (frame.height - side);
            let bbox = BoundingBox::new(
                x1 as i32,
                y1 as i32,
                (x1 + side) as i32,
                (y1 + side) as i32,
            );
            let class = match seed[3] % 4 {
                0 => VehicleClass::Bus,
                1 => VehicleClass::Truck,
                _ => VehicleClass::Car,
            };
            let confidence = 0.4 + (seed[4] % 60) as f32 / 100.0;
            vehicles.push(VehicleDetection::new(
                bbox,
                class,
                confidence,
                frame.index,
                i,
            ));
        }

        Ok(vehicles)
    }
}

/// Stub plate detector. Finds a "plate" in roughly half of all sufficiently
/// large crops, placed in the lower third where a real plate would sit.
pub struct StubPlateDetector;

impl StubPlateDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubPlateDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PlateDetector for StubPlateDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, crop: &CropImage) -> Result<Option<PlateDetection>> {
        if crop.width < MIN_PLATE_CROP_DIM || crop.height < MIN_PLATE_CROP_DIM {
            return Ok(None);
        }

        let hash: [u8; 32] = Sha256::digest(&crop.data).into();
        if hash[0] % 2 != 0 {
            return Ok(None);
        }

        let plate_w = (crop.width / 3).max(1);
        let plate_h = (crop.height / 8).max(1);
        let x1 = (crop.width - plate_w) as i32 / 2;
        let y1 = (crop.height - crop.height / 4) as i32;
        let bbox = BoundingBox::new(x1, y1, x1 + plate_w as i32, y1 + plate_h as i32)
            .clamp_to(crop.width, crop.height);
        let confidence = 0.35 + (hash[1] % 60) as f32 / 100.0;

        let frame = Frame::new(crop.data.clone(), crop.width, crop.height, 0)?;
        let Some(plate_crop) = frame.crop(bbox) else {
            return Ok(None);
        };

        Ok(Some(PlateDetection {
            bbox,
            confidence,
            crop: plate_crop,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_byte(value: u8) -> Frame {
        Frame::new(vec![value; 640 * 480 * 3], 640, 480, 3).expect("frame")
    }

    #[test]
    fn stub_vehicle_detector_is_deterministic() {
        let mut a = StubVehicleDetector::new();
        let mut b = StubVehicleDetector::new();
        let frame = frame_with_byte(9);
        let da = a.detect(&frame).unwrap();
        let db = b.detect(&frame).unwrap();
        assert_eq!(da.len(), db.len());
        for (x, y) in da.iter().zip(db.iter()) {
            assert_eq!(x.bbox, y.bbox);
            assert_eq!(x.vehicle_id, y.vehicle_id);
        }
    }

    #[test]
    fn stub_vehicle_boxes_meet_minimum_size() {
        let mut detector = StubVehicleDetector::new();
        for value in 0..32u8 {
            for v in detector.detect(&frame_with_byte(value)).unwrap() {
                assert!(v.bbox.width() >= 100);
                assert!(v.bbox.height() >= 100);
            }
        }
    }

    #[test]
    fn stub_plate_detector_rejects_small_crops() {
        let mut detector = StubPlateDetector::new();
        let crop = CropImage {
            data: vec![0; 99 * 200 * 3],
            width: 99,
            height: 200,
        };
        assert!(detector.detect(&crop).unwrap().is_none());
    }

    #[test]
    fn stub_plate_box_is_inside_crop() {
        let mut detector = StubPlateDetector::new();
        for value in 0..16u8 {
            let crop = CropImage {
                data: vec![value; 160 * 160 * 3],
                width: 160,
                height: 160,
            };
            if let Some(plate) = detector.detect(&crop).unwrap() {
                assert!(plate.bbox.x2 <= 160);
                assert!(plate.bbox.y2 <= 160);
                assert!(plate.bbox.width() > 0);
                assert!(plate.bbox.height() > 0);
            }
        }
    }
}
