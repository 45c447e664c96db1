use anyhow::Result;

use crate::detect::result::{PlateDetection, VehicleDetection};
use crate::frame::{CropImage, Frame};

/// Vehicle detector contract.
///
/// Implementations are black boxes to the pipeline: model architecture,
/// preprocessing, and inference all live behind this trait. The pipeline only
/// relies on the contract below.
///
/// - Returns only classes of interest (`VehicleClass`).
/// - Boxes below the implementation's own minimum size are pre-filtered.
/// - `detect` takes `&mut self` so implementations may keep warm state
///   (loaded models, previous-frame hashes) without interior mutability.
///
/// A returned `Err` is treated as a per-frame failure: the worker logs it and
/// moves on to the next frame. It never terminates the pipeline.
pub trait VehicleDetector: Send {
    /// Implementation identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Detect vehicles in one frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<VehicleDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Plate detector contract.
///
/// - Returns at most one detection per crop.
/// - Returns `Ok(None)` when the crop's smaller dimension is under
///   [`MIN_PLATE_CROP_DIM`] pixels or nothing plausible is found.
/// - Internal model failures should degrade to `Ok(None)` where possible;
///   "no plate" and "the model broke" are distinct conditions and only the
///   latter is worth an `Err`.
pub trait PlateDetector: Send {
    fn name(&self) -> &'static str;

    /// Detect a plate inside a vehicle crop.
    fn detect(&mut self, crop: &CropImage) -> Result<Option<PlateDetection>>;
}

/// Crops with a smaller dimension under this are rejected by plate detectors.
pub const MIN_PLATE_CROP_DIM: u32 = 100;
