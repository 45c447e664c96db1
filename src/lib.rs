//! Platewatch
//!
//! An asynchronous vehicle and license-plate detection pipeline for video
//! sources.
//!
//! # Architecture
//!
//! A coordinator thread paces frame capture and rendering while two worker
//! stages run detection concurrently:
//!
//! 1. **Capture never blocks on inference**: sampled frames are offered to a
//!    bounded queue; a full queue drops the sample.
//! 2. **Detection results are eventually consistent**: rendering overlays the
//!    most recently published detection set, not the current frame's.
//! 3. **Plate hits outlive their frame**: a registry keeps each plate visible
//!    for a fixed number of rendered frames after its last update.
//! 4. **Failures are per-item**: a detector error or crop-write failure is
//!    logged and the run continues; only an unopenable source is fatal.
//!
//! # Module Structure
//!
//! - `frame`: RGB frame buffers, bounding boxes, crop extraction
//! - `ingest`: video sources (local files via ffmpeg, `stub://` synthetic)
//! - `detect`: detector contracts and backends (hash stub, tract-onnx)
//! - `registry`: shared detection state and the TTL plate registry
//! - `pipeline`: the coordinator and both worker stages
//! - `storage`: crop persistence and the async crop writer
//! - `annotate` / `preview`: frame annotation and the MJPEG preview server

pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod preview;
pub mod registry;
pub mod stats;
pub mod storage;

pub use config::PlatewatchConfig;
pub use detect::{
    PlateDetection, PlateDetector, StubPlateDetector, StubVehicleDetector, VehicleClass,
    VehicleDetection, VehicleDetector,
};
pub use frame::{BoundingBox, CropImage, Frame};
pub use ingest::{FileConfig, FileSource};
pub use pipeline::Pipeline;
pub use registry::{LivePlate, PlateRegistry, PlateRegistryEntry};
pub use stats::PipelineStats;
