mod backend;
mod backends;
mod result;

pub use backend::{PlateDetector, VehicleDetector, MIN_PLATE_CROP_DIM};
pub use backends::{StubPlateDetector, StubVehicleDetector};
#[cfg(feature = "backend-tract")]
pub use backends::{TractPlateDetector, TractVehicleDetector};
pub use result::{PlateDetection, VehicleClass, VehicleDetection};
