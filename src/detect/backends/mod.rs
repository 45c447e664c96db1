mod stub;
#[cfg(feature = "backend-tract")]
mod tract;

pub use stub::{StubPlateDetector, StubVehicleDetector};
#[cfg(feature = "backend-tract")]
pub use tract::{TractPlateDetector, TractVehicleDetector};
