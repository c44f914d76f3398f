//! Writes selected tracks of a camera stream into container files.
//!
//! [`StreamWriter`] is generic over a [`MediaLibrary`]: [`FfmpegLibrary`]
//! produces real files, [`memory::MemoryLibrary`] records what would have
//! been written.

/// Registers FFmpeg components. Call once at startup before writing.
pub fn init() -> Result<()> {
    ffmpeg_next::init()?;
    Ok(())
}

pub mod config;
pub mod encoder;
pub mod error;
pub mod ffmpeg;
#[cfg(any(test, feature = "test-util"))]
pub mod fixture;
pub mod logger;
pub mod mapper;
pub mod media;
pub mod memory;
pub mod packet;
pub mod stream;
pub mod timestamp;
pub mod writer;

pub use config::WriterConfig;
pub use error::{Result, WriterError};
pub use ffmpeg::FfmpegLibrary;
pub use logger::{LogFacade, MemoryLog, SessionLog};
pub use media::{MediaKind, MediaLibrary, SourceTrack};
pub use writer::StreamWriter;
