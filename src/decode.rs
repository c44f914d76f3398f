use std::ops::{Deref, DerefMut};

use ffmpeg_next::{codec::Parameters, format::Sample, Frame, Packet, Rational};
use ffmpeg_writer::SourceTrack;

pub enum RawFrame {
    Video(ffmpeg_next::frame::Video),
    Audio(ffmpeg_next::frame::Audio),
}

impl Deref for RawFrame {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        match self {
            RawFrame::Video(frame) => frame,
            RawFrame::Audio(frame) => frame,
        }
    }
}

impl DerefMut for RawFrame {
    fn deref_mut(&mut self) -> &mut Frame {
        match self {
            RawFrame::Video(frame) => frame,
            RawFrame::Audio(frame) => frame,
        }
    }
}

enum DecoderType {
    Video(ffmpeg_next::codec::decoder::Video),
    Audio(ffmpeg_next::codec::decoder::Audio),
}

fn received<T>(result: Result<(), ffmpeg_next::Error>, frame: T) -> anyhow::Result<Option<T>> {
    match result {
        Ok(()) => Ok(Some(frame)),
        Err(ffmpeg_next::Error::Eof) => Ok(None),
        Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Decodes one source track. Frames keep the source track's time base.
pub struct Decoder {
    stream_index: usize,
    inner: DecoderType,
    time_base: Rational,
}

impl Decoder {
    pub fn new(stream: &SourceTrack<Parameters>) -> anyhow::Result<Self> {
        let mut decoder_ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        decoder_ctx.set_parameters(stream.parameters().clone())?;

        let inner = if stream.is_video() {
            let video_decoder = decoder_ctx.decoder().video()?;
            if video_decoder.format() == ffmpeg_next::format::Pixel::None
                || video_decoder.width() == 0
                || video_decoder.height() == 0
            {
                return Err(anyhow::anyhow!("missing codec parameters"));
            }
            DecoderType::Video(video_decoder)
        } else if stream.is_audio() {
            DecoderType::Audio(decoder_ctx.decoder().audio()?)
        } else {
            return Err(anyhow::anyhow!("unsupported stream type"));
        };

        Ok(Self {
            stream_index: stream.index(),
            inner,
            time_base: stream.time_base(),
        })
    }

    pub fn send_packet(&mut self, packet: &Packet) -> anyhow::Result<()> {
        match &mut self.inner {
            DecoderType::Video(decoder) => decoder.send_packet(packet)?,
            DecoderType::Audio(decoder) => decoder.send_packet(packet)?,
        }
        Ok(())
    }

    pub fn send_eof(&mut self) -> anyhow::Result<()> {
        match &mut self.inner {
            DecoderType::Video(decoder) => decoder.send_eof()?,
            DecoderType::Audio(decoder) => decoder.send_eof()?,
        }
        Ok(())
    }

    /// `Ok(None)` when the decoder needs more input.
    pub fn receive_frame(&mut self) -> anyhow::Result<Option<RawFrame>> {
        match &mut self.inner {
            DecoderType::Video(decoder) => {
                let mut frame = ffmpeg_next::frame::Video::empty();
                let result = decoder.receive_frame(&mut frame);
                Ok(received(result, frame)?.map(RawFrame::Video))
            }
            DecoderType::Audio(decoder) => {
                let mut frame = ffmpeg_next::frame::Audio::empty();
                let result = decoder.receive_frame(&mut frame);
                Ok(received(result, frame)?.map(RawFrame::Audio))
            }
        }
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Sample format of decoded audio frames; `None` for video.
    pub fn sample_format(&self) -> Option<Sample> {
        match &self.inner {
            DecoderType::Video(_) => None,
            DecoderType::Audio(decoder) => Some(decoder.format()),
        }
    }
}
