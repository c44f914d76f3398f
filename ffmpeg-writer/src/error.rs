//! Error types for the output session.

use thiserror::Error;

use crate::media::MediaKind;

/// Result type alias using [`WriterError`].
pub type Result<T> = std::result::Result<T, WriterError>;

/// Failures surfaced by the writer. Out-of-order and duplicate timestamps
/// are not errors; they are corrected or dropped in place.
#[derive(Error, Debug)]
pub enum WriterError {
    /// Context, stream, packet or encoder allocation failed.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// The output sink could not be opened or written.
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// Header, trailer or codec parameter handling failed.
    #[error("format error: {0}")]
    Format(String),

    /// Encoder open, send or receive failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The container rejected a packet.
    #[error("muxing error for camera {camera}: {reason}")]
    Muxing { camera: String, reason: String },

    /// Write or flush attempted on a session that is not open.
    #[error("output session is not open")]
    NotOpen,

    /// `open` called before any track registration allocated a context.
    #[error("no output context, register tracks first")]
    NoContext,

    /// The source track is not mapped to any output track.
    #[error("source track {0} has no output track")]
    UnmappedTrack(usize),

    /// Only audio and video can be re-encoded.
    #[error("cannot transcode {0} tracks")]
    Unsupported(MediaKind),

    /// None of the candidate encoders is available.
    #[error("no {0} encoder available")]
    EncoderNotFound(MediaKind),

    /// Transcoded registration requires decoder parameters.
    #[error("missing decoder parameters for source track {0}")]
    MissingDecoderParameters(usize),

    /// A raw frame was submitted for a track registered for passthrough.
    #[error("source track {0} is not configured for transcoding")]
    NotTranscoded(usize),

    #[error("ffmpeg: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("config: {0}")]
    Config(#[from] serde_json::Error),
}
