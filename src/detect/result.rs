use crate::frame::{BoundingBox, CropImage};

/// Vehicle classes the pipeline cares about. Everything else is dropped by
/// the detector implementations.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VehicleClass {
    Car,
    Bus,
    Truck,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 3] = [VehicleClass::Car, VehicleClass::Bus, VehicleClass::Truck];

    pub fn label(&self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::Bus => "bus",
            VehicleClass::Truck => "truck",
        }
    }

    /// Overlay color (RGB) for this class.
    pub fn color(&self) -> [u8; 3] {
        match self {
            VehicleClass::Car => [0, 255, 0],
            VehicleClass::Bus => [255, 0, 255],
            VehicleClass::Truck => [255, 165, 0],
        }
    }
}

/// One vehicle found in one sampled frame.
///
/// `vehicle_id` is derived from the frame index, the detection's position in
/// that frame's result list, and the class. It identifies a detection
/// instance, not a tracked object: the same physical vehicle gets a fresh id
/// on every sampled frame. That is sufficient for correlating a vehicle with
/// its plate inside one registry-entry lifetime, and nothing here assumes
/// more.
#[derive(Clone, Debug)]
pub struct VehicleDetection {
    pub bbox: BoundingBox,
    pub class: VehicleClass,
    pub confidence: f32,
    pub frame_index: u64,
    pub vehicle_id: String,
}

impl VehicleDetection {
    pub fn new(
        bbox: BoundingBox,
        class: VehicleClass,
        confidence: f32,
        frame_index: u64,
        detection_index: usize,
    ) -> Self {
        let vehicle_id = format!("{}_{}_{}", frame_index, detection_index, class.label());
        Self {
            bbox,
            class,
            confidence,
            frame_index,
            vehicle_id,
        }
    }
}

/// One plate found inside a vehicle crop. The box is relative to the crop,
/// not the full frame.
#[derive(Clone)]
pub struct PlateDetection {
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub crop: CropImage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_id_is_deterministic() {
        let bbox = BoundingBox::new(0, 0, 120, 120);
        let a = VehicleDetection::new(bbox, VehicleClass::Car, 0.9, 42, 1);
        let b = VehicleDetection::new(bbox, VehicleClass::Car, 0.4, 42, 1);
        assert_eq!(a.vehicle_id, "42_1_car");
        assert_eq!(a.vehicle_id, b.vehicle_id);
    }

    #[test]
    fn classes_have_distinct_colors() {
        let colors: Vec<_> = VehicleClass::ALL.iter().map(|c| c.color()).collect();
        assert_ne!(colors[0], colors[1]);
        assert_ne!(colors[1], colors[2]);
    }
}
