//! Encoder selection for transcoded tracks.
//!
//! The policy is an ordered list of candidate codecs per media kind: the one
//! named in the configuration first, then a fixed default. The first one the
//! library can provide wins.

use ffmpeg_next::{Rational, codec};

use crate::{
    Result, WriterError,
    config::WriterConfig,
    media::{CodecParameters, MediaKind},
};

pub const DEFAULT_AUDIO_CODEC: codec::Id = codec::Id::AAC;
pub const DEFAULT_VIDEO_CODEC: codec::Id = codec::Id::H264;

const KNOWN_CODECS: &[(&str, codec::Id, MediaKind)] = &[
    ("aac", codec::Id::AAC, MediaKind::Audio),
    ("ac3", codec::Id::AC3, MediaKind::Audio),
    ("eac3", codec::Id::EAC3, MediaKind::Audio),
    ("mp3", codec::Id::MP3, MediaKind::Audio),
    ("opus", codec::Id::OPUS, MediaKind::Audio),
    ("flac", codec::Id::FLAC, MediaKind::Audio),
    ("h264", codec::Id::H264, MediaKind::Video),
    ("avc", codec::Id::H264, MediaKind::Video),
    ("hevc", codec::Id::HEVC, MediaKind::Video),
    ("h265", codec::Id::HEVC, MediaKind::Video),
    ("vp9", codec::Id::VP9, MediaKind::Video),
    ("av1", codec::Id::AV1, MediaKind::Video),
    ("mjpeg", codec::Id::MJPEG, MediaKind::Video),
];

/// Map a configuration codec name to a codec of the given kind.
pub fn codec_by_name(name: &str, kind: MediaKind) -> Option<codec::Id> {
    let name = name.trim().to_ascii_lowercase();
    KNOWN_CODECS
        .iter()
        .find(|(n, _, k)| *n == name && *k == kind)
        .map(|(_, id, _)| *id)
}

/// Candidate codecs for `kind`, most preferred first.
pub fn candidates(kind: MediaKind, config: &WriterConfig) -> Result<Vec<codec::Id>> {
    let (key, default) = match kind {
        MediaKind::Audio => ("encode-format-audio", DEFAULT_AUDIO_CODEC),
        MediaKind::Video => ("encode-format-video", DEFAULT_VIDEO_CODEC),
        MediaKind::Other => return Err(WriterError::Unsupported(kind)),
    };
    let mut list = Vec::with_capacity(2);
    if let Some(id) = codec_by_name(config.get_value(key), kind) {
        list.push(id);
    }
    if !list.contains(&default) {
        list.push(default);
    }
    Ok(list)
}

/// First candidate for which `available` holds.
pub fn select_encoder<F>(kind: MediaKind, config: &WriterConfig, available: F) -> Result<codec::Id>
where
    F: Fn(codec::Id) -> bool,
{
    candidates(kind, config)?
        .into_iter()
        .find(|id| available(*id))
        .ok_or(WriterError::EncoderNotFound(kind))
}

/// First format an encoder advertises, or `fallback` when it advertises none.
pub fn first_or<F, I>(advertised: I, fallback: F) -> F
where
    I: IntoIterator<Item = F>,
{
    advertised.into_iter().next().unwrap_or(fallback)
}

/// What the session decided about an encoder before the library opens it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderSettings {
    pub codec: codec::Id,
    pub kind: MediaKind,
    /// Audio: 1/sample_rate. Video: the source track's time base.
    pub time_base: Rational,
    /// Container wants out-of-band codec headers.
    pub global_header: bool,
}

impl EncoderSettings {
    pub fn new<P: CodecParameters>(
        codec: codec::Id,
        decoder: &P,
        source_time_base: Rational,
        global_header: bool,
    ) -> Result<Self> {
        let kind = decoder.kind();
        let time_base = match kind {
            MediaKind::Audio => {
                let rate = decoder.sample_rate();
                if rate <= 0 {
                    return Err(WriterError::Encoding(format!(
                        "invalid audio sample rate {}",
                        rate
                    )));
                }
                Rational::new(1, rate)
            }
            MediaKind::Video => source_time_base,
            MediaKind::Other => return Err(WriterError::Unsupported(kind)),
        };
        Ok(Self {
            codec,
            kind,
            time_base,
            global_header,
        })
    }
}
