//! Local file frame source.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::Frame;

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;

/// Configuration for a file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path or `stub://<name>` for the synthetic source.
    pub path: String,
    /// Frame rate the synthetic source advertises. The ffmpeg backend
    /// reports the container's rate instead.
    pub target_fps: u32,
    /// Synthetic source stops after this many frames. `None` runs forever.
    pub frame_limit: Option<u64>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 30,
            frame_limit: None,
        }
    }
}

/// Video frame source backed by a local file or the synthetic generator.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open the source. This is the pipeline's only fatal failure point:
    /// an unopenable source aborts the run before any stage starts.
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        if config.path.starts_with("stub://") {
            return Ok(Self {
                backend: FileBackend::Synthetic(SyntheticFileSource::new(config)),
            });
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::open(config)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "file ingestion requires the ingest-file-ffmpeg feature"
            ))
        }
    }

    /// Decode the next frame, or `Ok(None)` when the source is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    /// Source frame rate, used for pacing.
    pub fn fps(&self) -> f64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.config.target_fps as f64,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.fps(),
        }
    }

    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_captured: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Self {
        log::info!("FileSource: opened {} (synthetic)", config.path);
        Self {
            config,
            frame_count: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        let index = self.frame_count;
        self.frame_count += 1;
        let pixels = self.generate_pixels(index);
        Frame::new(pixels, SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT, index).map(Some)
    }

    /// A flat background with a block that drifts across the scene, so
    /// consecutive frames differ and hash-driven stubs produce varied output.
    fn generate_pixels(&self, index: u64) -> Vec<u8> {
        let (w, h) = (SYNTHETIC_WIDTH as usize, SYNTHETIC_HEIGHT as usize);
        let mut pixels = vec![32u8; w * h * 3];
        let block = 120usize;
        let x0 = (index as usize * 11) % (w - block);
        let y0 = (index as usize * 7) % (h - block);
        for y in y0..y0 + block {
            for x in x0..x0 + block {
                let idx = (y * w + x) * 3;
                pixels[idx] = 200;
                pixels[idx + 1] = (index % 256) as u8;
                pixels[idx + 2] = 96;
            }
        }
        pixels
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_url_schemes() {
        let config = FileConfig {
            path: "http://example.com/video.mp4".to_string(),
            ..FileConfig::default()
        };
        assert!(FileSource::open(config).is_err());
    }

    #[test]
    fn synthetic_source_honors_frame_limit() {
        let config = FileConfig {
            path: "stub://traffic".to_string(),
            frame_limit: Some(3),
            ..FileConfig::default()
        };
        let mut source = FileSource::open(config).expect("open");
        for expected in 0..3 {
            let frame = source.next_frame().expect("frame").expect("some");
            assert_eq!(frame.index, expected);
        }
        assert!(source.next_frame().expect("end").is_none());
        assert_eq!(source.stats().frames_captured, 3);
    }

    #[test]
    fn synthetic_frames_differ_between_indices() {
        let config = FileConfig {
            path: "stub://traffic".to_string(),
            frame_limit: Some(2),
            ..FileConfig::default()
        };
        let mut source = FileSource::open(config).expect("open");
        let a = source.next_frame().unwrap().unwrap();
        let b = source.next_frame().unwrap().unwrap();
        assert_ne!(a.pixels(), b.pixels());
    }
}
