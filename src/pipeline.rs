//! The asynchronous detection pipeline.
//!
//! Three concurrent units: the coordinator (capture, pacing, rendering,
//! registry aging, shutdown) and two worker stages (vehicle detection, plate
//! detection). They communicate only through two bounded queues and two
//! independently locked shared structures; every hand-off is non-blocking
//! with drop-on-full, so a slow detector degrades detection cadence instead
//! of stalling capture or rendering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::annotate;
use crate::config::{OutputSettings, PipelineSettings, PlatewatchConfig};
use crate::detect::{PlateDetector, VehicleClass, VehicleDetection, VehicleDetector};
use crate::frame::{CropImage, Frame};
use crate::ingest::{FileConfig, FileSource};
use crate::preview;
use crate::registry::{DetectionState, PlateRegistry};
use crate::stats::PipelineStats;
use crate::storage::{self, CropWriter};

/// Bounded wait on queue pops so workers observe the running flag promptly.
const QUEUE_POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Best-effort join budget per worker stage at shutdown.
const STAGE_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// One unit of plate-stage work: an expanded car crop plus the detection it
/// came from.
struct PlateJob {
    vehicle: VehicleDetection,
    crop: CropImage,
}

/// State shared between the coordinator and the worker stages. Built once at
/// pipeline construction and passed by `Arc`; the two mutexes are locked
/// independently and never across a detector call.
struct SharedState {
    running: AtomicBool,
    detections: Mutex<DetectionState>,
    plates: Mutex<PlateRegistry>,
}

impl SharedState {
    fn new(ttl_frames: u32) -> Self {
        Self {
            running: AtomicBool::new(true),
            detections: Mutex::new(DetectionState::new()),
            plates: Mutex::new(PlateRegistry::new(ttl_frames)),
        }
    }

    fn detections(&self) -> MutexGuard<'_, DetectionState> {
        self.detections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn plates(&self) -> MutexGuard<'_, PlateRegistry> {
        self.plates.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The detection pipeline.
pub struct Pipeline {
    config: PlatewatchConfig,
    vehicle_detector: Box<dyn VehicleDetector>,
    plate_detector: Option<Box<dyn PlateDetector>>,
    quit: Arc<AtomicBool>,
}

impl Pipeline {
    /// Build a pipeline. The plate detector is optional; without one, plate
    /// dispatch is disabled and the registry stays empty.
    pub fn new(
        config: PlatewatchConfig,
        vehicle_detector: Box<dyn VehicleDetector>,
        plate_detector: Option<Box<dyn PlateDetector>>,
    ) -> Self {
        Self {
            config,
            vehicle_detector,
            plate_detector,
            quit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// External quit signal; the coordinator checks it every render
    /// iteration. Wire this to a ctrl-c handler or flip it from a test.
    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        self.quit.clone()
    }

    /// Run the pipeline to source exhaustion or quit.
    ///
    /// The only fatal failures are an unopenable source and an unusable
    /// output directory, both surfaced before any stage starts. Everything
    /// after that is per-item: detector errors, crop write failures, and
    /// queue-full drops are logged (or silently absorbed) and the run
    /// continues.
    pub fn run(self, source_config: FileConfig) -> Result<PipelineStats> {
        let Pipeline {
            config,
            vehicle_detector,
            plate_detector,
            quit,
        } = self;

        let mut source =
            FileSource::open(source_config).context("video source unavailable")?;
        storage::reset_output_dirs(&config.output)?;

        let plate_enabled = plate_detector.is_some();
        let fps = source.fps().min(config.source.fps_cap as f64).max(1.0);
        let frame_interval = Duration::from_secs_f64(1.0 / fps);
        log::info!(
            "pipeline starting: source={} paced at {:.1} fps, sampling every {} frames, plate detection {}",
            source.stats().path,
            fps,
            config.pipeline.sample_interval,
            if plate_enabled { "enabled" } else { "disabled" },
        );

        let shared = Arc::new(SharedState::new(config.pipeline.plate_ttl_frames));
        let crop_writer = Arc::new(CropWriter::spawn());

        let (frame_tx, frame_rx) = sync_channel::<Frame>(config.pipeline.frame_queue_capacity);

        let (plate_tx, plate_worker) = if let Some(detector) = plate_detector {
            let (tx, rx) = sync_channel::<PlateJob>(config.pipeline.plate_queue_capacity);
            let worker = spawn_plate_stage(
                detector,
                rx,
                shared.clone(),
                crop_writer.clone(),
                config.output.clone(),
            )?;
            (Some(tx), Some(worker))
        } else {
            (None, None)
        };

        let vehicle_worker = spawn_vehicle_stage(
            vehicle_detector,
            frame_rx,
            plate_tx.clone(),
            shared.clone(),
            crop_writer.clone(),
            config.pipeline.clone(),
            config.output.clone(),
        )?;

        let preview_frame = preview::shared_preview_frame();
        let preview_handle = if config.preview.enabled {
            let handle = preview::spawn(&config.preview, preview_frame.clone())?;
            log::info!("preview available at http://{}/stream.mjpg", handle.addr);
            Some(handle)
        } else {
            None
        };

        let mut last_frame_at = Instant::now();
        loop {
            if quit.load(Ordering::SeqCst) {
                log::info!("quit signal received");
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("source exhausted after {} frames", source.stats().frames_captured);
                    break;
                }
                Err(err) => {
                    log::error!("source read failed: {err:#}");
                    break;
                }
            };

            // Pacing: never render faster than min(source fps, cap).
            let elapsed = last_frame_at.elapsed();
            if elapsed < frame_interval {
                std::thread::sleep(frame_interval - elapsed);
            }
            last_frame_at = Instant::now();

            // Sub-sampling: every Nth frame goes to detection, all frames
            // are rendered. A full queue silently drops the sample.
            if frame.index % config.pipeline.sample_interval == 0 {
                try_enqueue_frame(&frame_tx, frame.clone());
            }

            render_frame(&config, &frame, &shared, &preview_frame);
        }

        // Shutdown: flag first, then close the queues so blocked pops end.
        shared.running.store(false, Ordering::SeqCst);
        drop(frame_tx);
        drop(plate_tx);

        join_with_timeout(vehicle_worker, STAGE_JOIN_TIMEOUT, "vehicle");
        if let Some(worker) = plate_worker {
            join_with_timeout(worker, STAGE_JOIN_TIMEOUT, "plate");
        }
        if let Some(handle) = preview_handle {
            handle.stop();
        }
        match Arc::try_unwrap(crop_writer) {
            Ok(writer) => writer.stop(),
            // A stage overran its join budget and still holds a clone.
            Err(_) => log::warn!("crop writer left running; pending writes may be lost"),
        }

        let stats = {
            let plates_found = shared.plates().plates_found;
            shared.detections().stats(plates_found)
        };
        stats.log_summary();
        Ok(stats)
    }
}

/// One rendered frame: snapshot the detection set, age the plate registry,
/// and publish an annotated preview frame unless the frame was marked slow.
fn render_frame(
    config: &PlatewatchConfig,
    frame: &Frame,
    shared: &SharedState,
    preview_frame: &preview::SharedPreviewFrame,
) {
    let (detections, is_slow) = {
        let mut state = shared.detections();
        let is_slow = state.consume_slow_mark(frame.index);
        (state.current.clone(), is_slow)
    };
    let live_plates = shared.plates().advance();

    if is_slow {
        log::warn!(
            "frame {} skipped for display (detection cycle over {}ms)",
            frame.index,
            config.pipeline.slow_cycle_ms
        );
        return;
    }
    if !config.preview.enabled {
        return;
    }

    match annotate::annotate_frame(frame, &detections, &live_plates)
        .and_then(|image| annotate::encode_jpeg(&image))
    {
        Ok(jpeg) => {
            if let Ok(mut latest) = preview_frame.lock() {
                *latest = Some(jpeg);
            }
        }
        Err(err) => log::warn!("failed to render frame {}: {err:#}", frame.index),
    }
}

/// Non-blocking frame submission. Queue-full is expected under load and is
/// not an error; it only lowers detection cadence.
fn try_enqueue_frame(tx: &SyncSender<Frame>, frame: Frame) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Cars at or above the minimum size are eligible for plate detection.
fn should_dispatch_plate(detection: &VehicleDetection, min_car_size: u32) -> bool {
    detection.class == VehicleClass::Car
        && detection.bbox.width() >= min_car_size
        && detection.bbox.height() >= min_car_size
}

fn spawn_vehicle_stage(
    detector: Box<dyn VehicleDetector>,
    frames: Receiver<Frame>,
    plate_tx: Option<SyncSender<PlateJob>>,
    shared: Arc<SharedState>,
    crop_writer: Arc<CropWriter>,
    pipeline: PipelineSettings,
    output: OutputSettings,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("vehicle-stage".into())
        .spawn(move || {
            run_vehicle_stage(detector, frames, plate_tx, shared, crop_writer, pipeline, output)
        })
        .context("failed to spawn vehicle detection stage")
}

fn run_vehicle_stage(
    mut detector: Box<dyn VehicleDetector>,
    frames: Receiver<Frame>,
    plate_tx: Option<SyncSender<PlateJob>>,
    shared: Arc<SharedState>,
    crop_writer: Arc<CropWriter>,
    pipeline: PipelineSettings,
    output: OutputSettings,
) {
    log::info!("vehicle detection stage started ({})", detector.name());
    if let Err(err) = detector.warm_up() {
        log::warn!("vehicle detector warm-up failed: {err:#}");
    }

    while shared.running.load(Ordering::SeqCst) {
        let frame = match frames.recv_timeout(QUEUE_POLL_TIMEOUT) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let started = Instant::now();
        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                // Per-item failure: log and move on, never kill the worker.
                log::warn!("vehicle detection failed on frame {}: {err:#}", frame.index);
                continue;
            }
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        {
            let mut state = shared.detections();
            state.latency.record(elapsed_ms);
            if elapsed_ms >= pipeline.slow_cycle_ms as f64 {
                state.slow_frames.insert(frame.index);
            }
        }

        for detection in &detections {
            persist_vehicle_crop(&frame, detection, &crop_writer, &output);

            if let Some(plate_tx) = &plate_tx {
                if should_dispatch_plate(detection, pipeline.min_car_size) {
                    dispatch_plate_job(&frame, detection, plate_tx, &output);
                }
            }
        }

        if !detections.is_empty() {
            let avg = shared.detections().latency.average().unwrap_or(elapsed_ms);
            log::info!(
                "frame {}: {} vehicles ({:.1}ms avg)",
                frame.index,
                detections.len(),
                avg
            );
        }

        shared.detections().publish(detections);
    }

    log::info!("vehicle detection stage stopped");
}

/// Persist a margin-expanded crop of every detection, skipping crops that
/// come out too small to be useful evidence.
fn persist_vehicle_crop(
    frame: &Frame,
    detection: &VehicleDetection,
    crop_writer: &CropWriter,
    output: &OutputSettings,
) {
    let region = detection
        .bbox
        .expand(output.crop_margin)
        .clamp_to(frame.width, frame.height);
    let Some(crop) = frame.crop(region) else {
        return;
    };
    if !crop.is_at_least(output.min_crop_size) {
        return;
    }
    let path = storage::vehicle_crop_path(output, detection.class, frame.index);
    crop_writer.submit(path, crop);
}

/// Best-effort plate dispatch: a wider crop than the evidence one, submitted
/// without blocking. A full plate queue drops the attempt.
fn dispatch_plate_job(
    frame: &Frame,
    detection: &VehicleDetection,
    plate_tx: &SyncSender<PlateJob>,
    output: &OutputSettings,
) {
    let region = detection
        .bbox
        .expand(output.plate_crop_margin)
        .clamp_to(frame.width, frame.height);
    let Some(crop) = frame.crop(region) else {
        return;
    };
    let job = PlateJob {
        vehicle: detection.clone(),
        crop,
    };
    if let Err(TrySendError::Full(_)) = plate_tx.try_send(job) {
        log::trace!("plate queue full, skipping vehicle {}", detection.vehicle_id);
    }
}

fn spawn_plate_stage(
    detector: Box<dyn PlateDetector>,
    jobs: Receiver<PlateJob>,
    shared: Arc<SharedState>,
    crop_writer: Arc<CropWriter>,
    output: OutputSettings,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("plate-stage".into())
        .spawn(move || run_plate_stage(detector, jobs, shared, crop_writer, output))
        .context("failed to spawn plate detection stage")
}

fn run_plate_stage(
    mut detector: Box<dyn PlateDetector>,
    jobs: Receiver<PlateJob>,
    shared: Arc<SharedState>,
    crop_writer: Arc<CropWriter>,
    output: OutputSettings,
) {
    log::info!("plate detection stage started ({})", detector.name());

    while shared.running.load(Ordering::SeqCst) {
        let job = match jobs.recv_timeout(QUEUE_POLL_TIMEOUT) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let started = Instant::now();
        let result = detector.detect(&job.crop);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        shared.plates().latency.record(elapsed_ms);

        match result {
            Ok(Some(plate)) => {
                let vehicle_id = job.vehicle.vehicle_id.clone();
                let path = storage::plate_crop_path(&output, &vehicle_id);
                crop_writer.submit(path.clone(), plate.crop.clone());

                let mut registry = shared.plates();
                let confidence = plate.confidence;
                registry.record(plate, job.vehicle, path);
                let avg = registry.latency.average().unwrap_or(elapsed_ms);
                log::info!(
                    "plate detected for vehicle {}: conf={:.2} ({:.1}ms avg)",
                    vehicle_id,
                    confidence,
                    avg
                );
            }
            Ok(None) => {}
            Err(err) => {
                // Crops are single-shot; a failed one is never resubmitted.
                log::warn!(
                    "plate detection failed for vehicle {}: {err:#}",
                    job.vehicle.vehicle_id
                );
            }
        }
    }

    log::info!("plate detection stage stopped");
}

/// Best-effort join: wait up to `timeout`, then proceed without the stage.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("{} stage did not stop within {:?}", name, timeout);
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    let _ = handle.join();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::BoundingBox;

    fn detection(class: VehicleClass, side: i32) -> VehicleDetection {
        VehicleDetection::new(BoundingBox::new(0, 0, side, side), class, 0.9, 0, 0)
    }

    #[test]
    fn plate_dispatch_requires_large_car() {
        assert!(should_dispatch_plate(&detection(VehicleClass::Car, 100), 100));
        assert!(should_dispatch_plate(&detection(VehicleClass::Car, 150), 100));
        assert!(!should_dispatch_plate(&detection(VehicleClass::Car, 99), 100));
        assert!(!should_dispatch_plate(&detection(VehicleClass::Bus, 150), 100));
        assert!(!should_dispatch_plate(&detection(VehicleClass::Truck, 150), 100));
    }

    #[test]
    fn frame_submission_drops_on_full_without_blocking() {
        let (tx, rx) = sync_channel::<Frame>(5);
        let frame = Frame::new(vec![0; 8 * 8 * 3], 8, 8, 0).unwrap();

        for _ in 0..5 {
            assert!(try_enqueue_frame(&tx, frame.clone()));
        }
        // Consumer paused: the queue holds exactly its capacity, every
        // further submission reports not-enqueued.
        for _ in 0..10 {
            assert!(!try_enqueue_frame(&tx, frame.clone()));
        }

        let mut buffered = 0;
        while rx.try_recv().is_ok() {
            buffered += 1;
        }
        assert_eq!(buffered, 5);
    }

    #[test]
    fn frame_queue_preserves_submission_order() {
        let (tx, rx) = sync_channel::<Frame>(5);
        for index in 0..3u64 {
            let frame = Frame::new(vec![0; 8 * 8 * 3], 8, 8, index).unwrap();
            assert!(try_enqueue_frame(&tx, frame));
        }
        for expected in 0..3u64 {
            assert_eq!(rx.try_recv().unwrap().index, expected);
        }
    }
}
