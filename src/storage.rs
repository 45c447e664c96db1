//! Evidence persistence: output directory lifecycle and the crop writer.
//!
//! Crop writes are fire-and-forget. The writer owns a bounded queue and a
//! dedicated thread so that JPEG encoding and disk latency never block a
//! detection stage; a full queue drops the crop. Write failures are logged
//! and ignored, they never propagate to callers.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::config::OutputSettings;
use crate::detect::VehicleClass;
use crate::frame::CropImage;

const WRITER_QUEUE_CAPACITY: usize = 64;
const JPEG_QUALITY: u8 = 90;

/// Milliseconds since the Unix epoch, used to keep crop filenames unique
/// even when the same vehicle_id recurs.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Delete and recreate both output directories. A run never appends to a
/// previous run's evidence.
pub fn reset_output_dirs(output: &OutputSettings) -> Result<()> {
    reset_dir(&output.crops_dir)?;
    reset_dir(&output.plates_dir)?;
    Ok(())
}

fn reset_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to clear output dir {}", path.display()))?;
    }
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create output dir {}", path.display()))?;
    Ok(())
}

/// `<class>_<frame_index>_<epoch_ms>.jpg` under the crops dir.
pub fn vehicle_crop_path(output: &OutputSettings, class: VehicleClass, frame_index: u64) -> PathBuf {
    output
        .crops_dir
        .join(format!("{}_{}_{}.jpg", class.label(), frame_index, epoch_ms()))
}

/// `plate_<vehicle_id>_<epoch_ms>.jpg` under the plates dir.
pub fn plate_crop_path(output: &OutputSettings, vehicle_id: &str) -> PathBuf {
    output
        .plates_dir
        .join(format!("plate_{}_{}.jpg", vehicle_id, epoch_ms()))
}

struct CropJob {
    path: PathBuf,
    image: CropImage,
}

/// Asynchronous JPEG crop sink.
pub struct CropWriter {
    tx: SyncSender<CropJob>,
    join: Option<JoinHandle<()>>,
}

impl CropWriter {
    pub fn spawn() -> Self {
        let (tx, rx) = sync_channel::<CropJob>(WRITER_QUEUE_CAPACITY);
        let join = std::thread::Builder::new()
            .name("crop-writer".into())
            .spawn(move || run_writer(rx))
            .expect("spawn crop writer thread");
        Self {
            tx,
            join: Some(join),
        }
    }

    /// Queue a crop for writing. Never blocks; returns false when the writer
    /// queue is full and the crop was dropped.
    pub fn submit(&self, path: PathBuf, image: CropImage) -> bool {
        match self.tx.try_send(CropJob { path, image }) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                log::debug!("crop writer queue full, dropping {}", job.path.display());
                false
            }
            Err(TrySendError::Disconnected(job)) => {
                log::warn!("crop writer stopped, dropping {}", job.path.display());
                false
            }
        }
    }

    /// Drain remaining jobs and join the writer thread.
    pub fn stop(self) {
        let Self { tx, mut join } = self;
        // Dropping the sender lets the writer loop drain and exit.
        drop(tx);
        if let Some(join) = join.take() {
            let _ = join.join();
        }
    }
}

fn run_writer(rx: Receiver<CropJob>) {
    while let Ok(job) = rx.recv() {
        if let Err(err) = write_jpeg(&job.path, &job.image) {
            log::warn!("failed to write crop {}: {}", job.path.display(), err);
        }
    }
}

fn write_jpeg(path: &Path, image: &CropImage) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), JPEG_QUALITY);
    encoder
        .encode(
            &image.data,
            image.width,
            image.height,
            ExtendedColorType::Rgb8,
        )
        .with_context(|| format!("failed to encode {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_settings(root: &Path) -> OutputSettings {
        OutputSettings {
            crops_dir: root.join("crops"),
            plates_dir: root.join("plates"),
            crop_margin: 5,
            plate_crop_margin: 10,
            min_crop_size: 30,
        }
    }

    #[test]
    fn reset_removes_previous_run_output() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let output = output_settings(tmp.path());

        fs::create_dir_all(&output.crops_dir).unwrap();
        fs::write(output.crops_dir.join("car_0_1.jpg"), b"stale").unwrap();
        fs::create_dir_all(&output.plates_dir).unwrap();
        fs::write(output.plates_dir.join("plate_0_0_car_1.jpg"), b"stale").unwrap();

        reset_output_dirs(&output).expect("reset");

        assert_eq!(fs::read_dir(&output.crops_dir).unwrap().count(), 0);
        assert_eq!(fs::read_dir(&output.plates_dir).unwrap().count(), 0);
    }

    #[test]
    fn writer_persists_submitted_crop() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let output = output_settings(tmp.path());
        reset_output_dirs(&output).expect("reset");

        let writer = CropWriter::spawn();
        let path = output.crops_dir.join("car_1_123.jpg");
        let crop = CropImage {
            data: vec![128; 64 * 48 * 3],
            width: 64,
            height: 48,
        };
        assert!(writer.submit(path.clone(), crop));
        writer.stop();

        let bytes = fs::read(&path).expect("written crop");
        assert!(!bytes.is_empty());
    }

    #[test]
    fn crop_paths_embed_class_and_vehicle_id() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let output = output_settings(tmp.path());

        let vehicle = vehicle_crop_path(&output, VehicleClass::Truck, 12);
        let name = vehicle.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("truck_12_"));
        assert!(name.ends_with(".jpg"));

        let plate = plate_crop_path(&output, "12_0_car");
        let name = plate.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("plate_12_0_car_"));
    }
}
