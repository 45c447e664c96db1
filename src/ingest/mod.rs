//! Frame ingestion sources.
//!
//! The pipeline reads frames from a `FileSource`:
//! - `stub://<name>` paths select a synthetic in-memory source (tests, demo
//!   runs without media files)
//! - real file/stream paths require the `ingest-file-ffmpeg` feature
//!
//! Sources own their decoder state; the pipeline owns the source. A source
//! reports exhaustion by returning `Ok(None)` from `next_frame`, which is a
//! normal terminal condition, not an error.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::{FileConfig, FileSource};
