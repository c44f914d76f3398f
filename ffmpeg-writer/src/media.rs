//! Seams between the output session and the container/codec library.
//!
//! The session only interprets success or failure of these primitives. The
//! FFmpeg implementation lives in [`crate::ffmpeg`], an in-memory one in
//! [`crate::memory`].

use std::fmt;

use ffmpeg_next::{Rational, codec};

use crate::{Result, encoder::EncoderSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
    Other,
}

impl MediaKind {
    /// Only audio and video tracks are ever written.
    pub fn is_recordable(self) -> bool {
        matches!(self, MediaKind::Audio | MediaKind::Video)
    }
}

impl From<ffmpeg_next::media::Type> for MediaKind {
    fn from(value: ffmpeg_next::media::Type) -> Self {
        match value {
            ffmpeg_next::media::Type::Audio => MediaKind::Audio,
            ffmpeg_next::media::Type::Video => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Codec parameters of a track, as far as the session needs to look inside.
pub trait CodecParameters: Clone {
    fn kind(&self) -> MediaKind;

    /// Audio sample rate, 0 when not applicable.
    fn sample_rate(&self) -> i32;
}

/// An encoded packet. `None` timestamps mean "unknown".
pub trait MediaPacket: Sized {
    fn stream(&self) -> usize;
    fn set_stream(&mut self, index: usize);

    fn pts(&self) -> Option<i64>;
    fn set_pts(&mut self, pts: Option<i64>);

    fn dts(&self) -> Option<i64>;
    fn set_dts(&mut self, dts: Option<i64>);

    fn duration(&self) -> i64;
    fn set_duration(&mut self, duration: i64);

    /// Byte position hint in the source; -1 means unknown.
    fn set_position(&mut self, position: i64);

    /// New reference to the same payload. The original stays untouched.
    fn duplicate(&self) -> Result<Self>;
}

/// An opened encoder driven with the send-frame / receive-packet protocol.
pub trait FrameEncoder {
    type Frame;
    type Packet;
    type Parameters;

    fn time_base(&self) -> Rational;

    /// Codec parameters describing the encoder's output stream.
    fn parameters(&self) -> Result<Self::Parameters>;

    /// Submit a frame, or `None` to signal end of stream.
    fn send_frame(&mut self, frame: Option<&Self::Frame>) -> Result<()>;

    /// `Ok(None)` once the encoder has nothing more to emit for now.
    fn receive_packet(&mut self) -> Result<Option<Self::Packet>>;
}

/// An allocated container-writer context bound to one path.
pub trait ContainerOutput {
    type Parameters;
    type Packet;

    /// False for formats that write through an existing handle.
    fn needs_file(&self) -> bool;

    /// True when encoders must emit out-of-band headers.
    fn global_header(&self) -> bool;

    fn open_sink(&mut self, path: &str) -> Result<()>;

    /// Release the sink handle if one was opened. Safe to call repeatedly.
    fn close_sink(&mut self);

    /// Describe the output layout at debug level.
    fn dump(&self) {}

    /// Allocate a new stream and return its index.
    fn add_stream(&mut self) -> Result<usize>;

    /// Allocate a stream already carrying `parameters` and `time_base`, with
    /// the container codec tag cleared. When the parameters cannot be copied
    /// no stream is added.
    fn add_configured_stream(
        &mut self,
        parameters: &Self::Parameters,
        time_base: Rational,
    ) -> Result<usize>;

    fn stream_count(&self) -> usize;

    /// Copy codec parameters onto a stream and clear its container codec tag.
    fn copy_parameters(&mut self, index: usize, parameters: &Self::Parameters) -> Result<()>;

    fn time_base(&self, index: usize) -> Rational;

    fn set_time_base(&mut self, index: usize, time_base: Rational);

    fn write_header(&mut self) -> Result<()>;

    fn write_interleaved(&mut self, packet: &mut Self::Packet) -> Result<()>;

    /// Drain packets buffered for interleaving.
    fn flush(&mut self) -> Result<()>;

    fn write_trailer(&mut self) -> Result<()>;
}

/// Factory for container contexts and encoders.
pub trait MediaLibrary {
    type Parameters: CodecParameters;
    type Packet: MediaPacket;
    type Frame;
    type Output: ContainerOutput<Parameters = Self::Parameters, Packet = Self::Packet>;
    type Encoder: FrameEncoder<
            Frame = Self::Frame,
            Packet = Self::Packet,
            Parameters = Self::Parameters,
        >;

    /// Guess the container format from `path` and allocate a context for it.
    /// Does not touch the file system.
    fn alloc_output(&self, path: &str) -> Result<Self::Output>;

    fn has_encoder(&self, codec: codec::Id) -> bool;

    /// Configure an encoder from the decoder's parameters and open it.
    fn open_encoder(
        &self,
        settings: &EncoderSettings,
        decoder: &Self::Parameters,
    ) -> Result<Self::Encoder>;
}

/// A demuxed source track.
#[derive(Debug, Clone)]
pub struct SourceTrack<P> {
    index: usize,
    kind: MediaKind,
    time_base: Rational,
    parameters: P,
}

impl<P: CodecParameters> SourceTrack<P> {
    pub fn new(index: usize, time_base: Rational, parameters: P) -> Self {
        Self {
            index,
            kind: parameters.kind(),
            time_base,
            parameters,
        }
    }
}

impl<P> SourceTrack<P> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn parameters(&self) -> &P {
        &self.parameters
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }
}
