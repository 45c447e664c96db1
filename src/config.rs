use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_SOURCE: &str = "stub://traffic";
const DEFAULT_FPS_CAP: u32 = 30;
const DEFAULT_SAMPLE_INTERVAL: u64 = 5;
const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 5;
const DEFAULT_PLATE_QUEUE_CAPACITY: usize = 10;
const DEFAULT_PLATE_TTL_FRAMES: u32 = 4;
const DEFAULT_SLOW_CYCLE_MS: u64 = 200;
const DEFAULT_MIN_CAR_SIZE: u32 = 100;
const DEFAULT_CROP_MARGIN: i32 = 5;
const DEFAULT_PLATE_CROP_MARGIN: i32 = 10;
const DEFAULT_MIN_CROP_SIZE: u32 = 30;
const DEFAULT_CROPS_DIR: &str = "crops";
const DEFAULT_PLATES_DIR: &str = "plates";
const DEFAULT_PREVIEW_ADDR: &str = "127.0.0.1:8798";

#[derive(Debug, Deserialize, Default)]
struct PlatewatchConfigFile {
    source: Option<SourceConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    output: Option<OutputConfigFile>,
    preview: Option<PreviewConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    path: Option<String>,
    fps_cap: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    sample_interval: Option<u64>,
    frame_queue_capacity: Option<usize>,
    plate_queue_capacity: Option<usize>,
    plate_ttl_frames: Option<u32>,
    slow_cycle_ms: Option<u64>,
    min_car_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    crops_dir: Option<PathBuf>,
    plates_dir: Option<PathBuf>,
    crop_margin: Option<i32>,
    plate_crop_margin: Option<i32>,
    min_crop_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    enabled: Option<bool>,
    addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PlatewatchConfig {
    pub source: SourceSettings,
    pub pipeline: PipelineSettings,
    pub output: OutputSettings,
    pub preview: PreviewSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Video source path; `stub://<name>` selects the synthetic source.
    pub path: String,
    /// Upper bound on the paced frame rate; the effective rate is
    /// `min(source_fps, fps_cap)`.
    pub fps_cap: u32,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Every Nth frame is offered to the detection queue.
    pub sample_interval: u64,
    pub frame_queue_capacity: usize,
    pub plate_queue_capacity: usize,
    /// Rendered frames a plate registry entry stays visible after its last
    /// update.
    pub plate_ttl_frames: u32,
    /// Detection cycles at or above this latency mark the frame as slow.
    pub slow_cycle_ms: u64,
    /// Minimum car box side for a plate-detection dispatch.
    pub min_car_size: u32,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub crops_dir: PathBuf,
    pub plates_dir: PathBuf,
    /// Margin added around every persisted vehicle crop.
    pub crop_margin: i32,
    /// Larger margin for the crops handed to the plate detector.
    pub plate_crop_margin: i32,
    /// Crops with either side under this are not persisted.
    pub min_crop_size: u32,
}

#[derive(Debug, Clone)]
pub struct PreviewSettings {
    pub enabled: bool,
    pub addr: String,
}

impl Default for PlatewatchConfig {
    fn default() -> Self {
        Self::from_file(PlatewatchConfigFile::default())
    }
}

impl PlatewatchConfig {
    /// Load configuration from the file named by `PLATEWATCH_CONFIG` (when
    /// set), then apply env overrides, then validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PLATEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PlatewatchConfigFile) -> Self {
        let source = SourceSettings {
            path: file
                .source
                .as_ref()
                .and_then(|source| source.path.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            fps_cap: file
                .source
                .as_ref()
                .and_then(|source| source.fps_cap)
                .unwrap_or(DEFAULT_FPS_CAP),
        };
        let pipeline = PipelineSettings {
            sample_interval: file
                .pipeline
                .as_ref()
                .and_then(|pipeline| pipeline.sample_interval)
                .unwrap_or(DEFAULT_SAMPLE_INTERVAL),
            frame_queue_capacity: file
                .pipeline
                .as_ref()
                .and_then(|pipeline| pipeline.frame_queue_capacity)
                .unwrap_or(DEFAULT_FRAME_QUEUE_CAPACITY),
            plate_queue_capacity: file
                .pipeline
                .as_ref()
                .and_then(|pipeline| pipeline.plate_queue_capacity)
                .unwrap_or(DEFAULT_PLATE_QUEUE_CAPACITY),
            plate_ttl_frames: file
                .pipeline
                .as_ref()
                .and_then(|pipeline| pipeline.plate_ttl_frames)
                .unwrap_or(DEFAULT_PLATE_TTL_FRAMES),
            slow_cycle_ms: file
                .pipeline
                .as_ref()
                .and_then(|pipeline| pipeline.slow_cycle_ms)
                .unwrap_or(DEFAULT_SLOW_CYCLE_MS),
            min_car_size: file
                .pipeline
                .as_ref()
                .and_then(|pipeline| pipeline.min_car_size)
                .unwrap_or(DEFAULT_MIN_CAR_SIZE),
        };
        let output = OutputSettings {
            crops_dir: file
                .output
                .as_ref()
                .and_then(|output| output.crops_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CROPS_DIR)),
            plates_dir: file
                .output
                .as_ref()
                .and_then(|output| output.plates_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PLATES_DIR)),
            crop_margin: file
                .output
                .as_ref()
                .and_then(|output| output.crop_margin)
                .unwrap_or(DEFAULT_CROP_MARGIN),
            plate_crop_margin: file
                .output
                .as_ref()
                .and_then(|output| output.plate_crop_margin)
                .unwrap_or(DEFAULT_PLATE_CROP_MARGIN),
            min_crop_size: file
                .output
                .as_ref()
                .and_then(|output| output.min_crop_size)
                .unwrap_or(DEFAULT_MIN_CROP_SIZE),
        };
        let preview = PreviewSettings {
            enabled: file
                .preview
                .as_ref()
                .and_then(|preview| preview.enabled)
                .unwrap_or(true),
            addr: file
                .preview
                .and_then(|preview| preview.addr)
                .unwrap_or_else(|| DEFAULT_PREVIEW_ADDR.to_string()),
        };
        Self {
            source,
            pipeline,
            output,
            preview,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("PLATEWATCH_SOURCE") {
            if !path.trim().is_empty() {
                self.source.path = path;
            }
        }
        if let Ok(addr) = std::env::var("PLATEWATCH_PREVIEW_ADDR") {
            if !addr.trim().is_empty() {
                self.preview.addr = addr;
            }
        }
        if let Ok(interval) = std::env::var("PLATEWATCH_SAMPLE_INTERVAL") {
            let parsed: u64 = interval
                .parse()
                .map_err(|_| anyhow!("PLATEWATCH_SAMPLE_INTERVAL must be an integer"))?;
            self.pipeline.sample_interval = parsed;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.path.trim().is_empty() {
            return Err(anyhow!("source path must not be empty"));
        }
        if self.source.fps_cap == 0 {
            return Err(anyhow!("fps cap must be greater than zero"));
        }
        if self.pipeline.sample_interval == 0 {
            return Err(anyhow!("sample interval must be greater than zero"));
        }
        if self.pipeline.frame_queue_capacity == 0 || self.pipeline.plate_queue_capacity == 0 {
            return Err(anyhow!("queue capacities must be greater than zero"));
        }
        if self.pipeline.plate_ttl_frames == 0 {
            return Err(anyhow!("plate TTL must be at least one rendered frame"));
        }
        if self.output.crops_dir == self.output.plates_dir {
            return Err(anyhow!("crops and plates directories must differ"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PlatewatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
