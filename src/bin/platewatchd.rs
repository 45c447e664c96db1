//! platewatchd - vehicle and license-plate detection daemon
//!
//! This daemon:
//! 1. Opens the configured video source (local file or `stub://` synthetic)
//! 2. Paces capture at min(source fps, cap) and renders every frame
//! 3. Feeds every Nth frame to the vehicle detection stage
//! 4. Dispatches large car detections to the plate detection stage
//! 5. Persists vehicle and plate crops under the output directories
//! 6. Serves the annotated stream as MJPEG over HTTP

use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;

use platewatch::{
    FileConfig, Pipeline, PlatewatchConfig, StubPlateDetector, StubVehicleDetector,
};
use platewatch::detect::{PlateDetector, VehicleDetector};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video source path; overrides the configured source.
    #[arg(long, env = "PLATEWATCH_SOURCE")]
    source: Option<String>,
    /// Stop after this many frames (synthetic sources only).
    #[arg(long)]
    frame_limit: Option<u64>,
    /// Detector backend (stub|tract).
    #[arg(long, default_value = "stub")]
    backend: String,
    /// Vehicle detection model path (tract backend).
    #[arg(long, env = "PLATEWATCH_VEHICLE_MODEL")]
    vehicle_model: Option<String>,
    /// Plate detection model path (tract backend).
    #[arg(long, env = "PLATEWATCH_PLATE_MODEL")]
    plate_model: Option<String>,
    /// Run without plate detection.
    #[arg(long)]
    no_plates: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = PlatewatchConfig::load()?;
    apply_cli_overrides(&mut config, &args);

    let (vehicle_detector, plate_detector) = build_detectors(&args)?;
    let plate_detector = if args.no_plates { None } else { plate_detector };

    let source_config = FileConfig {
        path: config.source.path.clone(),
        target_fps: config.source.fps_cap,
        frame_limit: args.frame_limit,
    };

    let pipeline = Pipeline::new(config, vehicle_detector, plate_detector);

    let quit = pipeline.quit_flag();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, shutting down");
        quit.store(true, Ordering::SeqCst);
    })?;

    let stats = pipeline.run(source_config)?;
    log::info!(
        "platewatchd finished: {} frames processed, {} plates found",
        stats.frames_processed,
        stats.plates_found
    );
    Ok(())
}

fn apply_cli_overrides(config: &mut PlatewatchConfig, args: &Args) {
    if let Some(source) = &args.source {
        config.source.path = source.clone();
    }
}

fn build_detectors(
    args: &Args,
) -> Result<(Box<dyn VehicleDetector>, Option<Box<dyn PlateDetector>>)> {
    match args.backend.as_str() {
        "stub" => Ok((
            Box::new(StubVehicleDetector::new()),
            Some(Box::new(StubPlateDetector::new())),
        )),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            use anyhow::Context;
            use platewatch::detect::{TractPlateDetector, TractVehicleDetector};
            let vehicle_model = args
                .vehicle_model
                .as_deref()
                .context("--vehicle-model is required for the tract backend")?;
            let vehicle: Box<dyn VehicleDetector> =
                Box::new(TractVehicleDetector::new(vehicle_model, 640, 640)?);
            let plate = match args.plate_model.as_deref() {
                Some(path) => {
                    Some(Box::new(TractPlateDetector::new(path, 320, 320)?) as Box<dyn PlateDetector>)
                }
                None => None,
            };
            Ok((vehicle, plate))
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => anyhow::bail!("tract backend not compiled in (enable feature backend-tract)"),
        other => anyhow::bail!("unknown detector backend '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_source_overrides_config() {
        let args = Args::parse_from(["platewatchd", "--source", "stub://cli"]);
        let mut config = PlatewatchConfig::default();
        apply_cli_overrides(&mut config, &args);
        assert_eq!(config.source.path, "stub://cli");
        // args stay usable for detector construction after the override
        assert!(build_detectors(&args).is_ok());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let args = Args::parse_from(["platewatchd", "--backend", "nonexistent"]);
        assert!(build_detectors(&args).is_err());
    }
}
