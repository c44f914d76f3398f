//! FFmpeg implementation of the media seams.
//!
//! The container side works on a raw `AVFormatContext`: `ffmpeg_next`'s
//! output context opens the file as part of allocation, while the session
//! needs to allocate, add streams and open the sink as separate steps.

use std::{ffi::CString, ptr};

use ffmpeg_next::{Frame, Packet, Rational, codec, ffi, util::error::EAGAIN};

use crate::{
    Result, WriterError,
    encoder::{EncoderSettings, first_or},
    media::{ContainerOutput, FrameEncoder, MediaKind, MediaLibrary},
};

pub(crate) fn check(ret: i32) -> std::result::Result<(), ffmpeg_next::Error> {
    if ret < 0 {
        Err(ffmpeg_next::Error::from(ret))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegLibrary;

impl MediaLibrary for FfmpegLibrary {
    type Parameters = codec::Parameters;
    type Packet = Packet;
    type Frame = Frame;
    type Output = FfmpegOutput;
    type Encoder = FfmpegEncoder;

    fn alloc_output(&self, path: &str) -> Result<FfmpegOutput> {
        FfmpegOutput::alloc(path)
    }

    fn has_encoder(&self, codec: codec::Id) -> bool {
        ffmpeg_next::encoder::find(codec).is_some()
    }

    fn open_encoder(
        &self,
        settings: &EncoderSettings,
        decoder: &codec::Parameters,
    ) -> Result<FfmpegEncoder> {
        FfmpegEncoder::open(settings, decoder)
    }
}

pub struct FfmpegOutput {
    ctx: *mut ffi::AVFormatContext,
    path: CString,
}

// All calls happen on the thread driving the session.
unsafe impl Send for FfmpegOutput {}

impl FfmpegOutput {
    pub fn alloc(path: &str) -> Result<Self> {
        let c_path = CString::new(path)
            .map_err(|_| WriterError::Format(format!("invalid output path {:?}", path)))?;
        let mut ctx: *mut ffi::AVFormatContext = ptr::null_mut();
        let ret = unsafe {
            ffi::avformat_alloc_output_context2(&mut ctx, ptr::null(), ptr::null(), c_path.as_ptr())
        };
        if ret < 0 || ctx.is_null() {
            let reason = check(ret.min(-1))
                .err()
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(WriterError::Allocation(format!(
                "output context for {}: {}",
                path, reason
            )));
        }
        Ok(Self { ctx, path: c_path })
    }

    fn stream(&self, index: usize) -> Option<*mut ffi::AVStream> {
        unsafe {
            if index >= (*self.ctx).nb_streams as usize {
                return None;
            }
            Some(*(*self.ctx).streams.add(index))
        }
    }

    fn format_flags(&self) -> u32 {
        unsafe { (*(*self.ctx).oformat).flags as u32 }
    }
}

impl ContainerOutput for FfmpegOutput {
    type Parameters = codec::Parameters;
    type Packet = Packet;

    fn needs_file(&self) -> bool {
        self.format_flags() & ffi::AVFMT_NOFILE == 0
    }

    fn global_header(&self) -> bool {
        self.format_flags() & ffi::AVFMT_GLOBALHEADER != 0
    }

    fn open_sink(&mut self, path: &str) -> Result<()> {
        let c_path = CString::new(path)
            .map_err(|_| WriterError::Format(format!("invalid output path {:?}", path)))?;
        let ret = unsafe {
            ffi::avio_open(
                &mut (*self.ctx).pb,
                c_path.as_ptr(),
                ffi::AVIO_FLAG_WRITE as i32,
            )
        };
        check(ret).map_err(|e| WriterError::Io {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        self.path = c_path;
        Ok(())
    }

    fn close_sink(&mut self) {
        unsafe {
            if self.needs_file() && !(*self.ctx).pb.is_null() {
                ffi::avio_closep(&mut (*self.ctx).pb);
            }
        }
    }

    fn dump(&self) {
        if log::log_enabled!(target: "ffmpeg_writer", log::Level::Debug) {
            unsafe { ffi::av_dump_format(self.ctx, 0, self.path.as_ptr(), 1) };
        }
    }

    fn add_stream(&mut self) -> Result<usize> {
        let stream = unsafe { ffi::avformat_new_stream(self.ctx, ptr::null()) };
        if stream.is_null() {
            return Err(WriterError::Allocation("output stream".to_string()));
        }
        Ok(unsafe { (*stream).index as usize })
    }

    fn add_configured_stream(
        &mut self,
        parameters: &codec::Parameters,
        time_base: Rational,
    ) -> Result<usize> {
        let mut staged = unsafe { ffi::avcodec_parameters_alloc() };
        if staged.is_null() {
            return Err(WriterError::Allocation("codec parameters".to_string()));
        }
        // copied before the stream exists, a failed copy leaves the context as it was
        let copied = check(unsafe { ffi::avcodec_parameters_copy(staged, parameters.as_ptr()) });
        if let Err(e) = copied {
            unsafe { ffi::avcodec_parameters_free(&mut staged) };
            return Err(WriterError::Format(format!("parameter copy: {}", e)));
        }
        let stream = unsafe { ffi::avformat_new_stream(self.ctx, ptr::null()) };
        if stream.is_null() {
            unsafe { ffi::avcodec_parameters_free(&mut staged) };
            return Err(WriterError::Allocation("output stream".to_string()));
        }
        unsafe {
            std::mem::swap(&mut (*stream).codecpar, &mut staged);
            ffi::avcodec_parameters_free(&mut staged);
            (*(*stream).codecpar).codec_tag = 0;
            (*stream).time_base = time_base.into();
            Ok((*stream).index as usize)
        }
    }

    fn stream_count(&self) -> usize {
        unsafe { (*self.ctx).nb_streams as usize }
    }

    fn copy_parameters(&mut self, index: usize, parameters: &codec::Parameters) -> Result<()> {
        let stream = self
            .stream(index)
            .ok_or_else(|| WriterError::Format(format!("no output stream {}", index)))?;
        unsafe {
            check(ffi::avcodec_parameters_copy(
                (*stream).codecpar,
                parameters.as_ptr(),
            ))
            .map_err(|e| WriterError::Format(format!("parameter copy: {}", e)))?;
            // the source container's tag may not be valid in this one
            (*(*stream).codecpar).codec_tag = 0;
        }
        Ok(())
    }

    fn time_base(&self, index: usize) -> Rational {
        match self.stream(index) {
            Some(stream) => unsafe { (*stream).time_base.into() },
            None => Rational::new(0, 1),
        }
    }

    fn set_time_base(&mut self, index: usize, time_base: Rational) {
        if let Some(stream) = self.stream(index) {
            unsafe { (*stream).time_base = time_base.into() };
        }
    }

    fn write_header(&mut self) -> Result<()> {
        check(unsafe { ffi::avformat_write_header(self.ctx, ptr::null_mut()) })
            .map_err(|e| WriterError::Format(format!("header: {}", e)))?;
        Ok(())
    }

    fn write_interleaved(&mut self, packet: &mut Packet) -> Result<()> {
        check(unsafe { ffi::av_interleaved_write_frame(self.ctx, packet.as_mut_ptr()) })?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        check(unsafe { ffi::av_interleaved_write_frame(self.ctx, ptr::null_mut()) })?;
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<()> {
        check(unsafe { ffi::av_write_trailer(self.ctx) })
            .map_err(|e| WriterError::Format(format!("trailer: {}", e)))?;
        Ok(())
    }
}

impl Drop for FfmpegOutput {
    fn drop(&mut self) {
        self.close_sink();
        unsafe { ffi::avformat_free_context(self.ctx) };
    }
}

enum EncoderType {
    Video(ffmpeg_next::codec::encoder::Video),
    Audio(ffmpeg_next::codec::encoder::Audio),
}

impl EncoderType {
    fn context(&self) -> &codec::Context {
        match self {
            EncoderType::Video(encoder) => encoder,
            EncoderType::Audio(encoder) => encoder,
        }
    }

    fn encoder_mut(&mut self) -> &mut codec::encoder::Encoder {
        match self {
            EncoderType::Video(encoder) => encoder,
            EncoderType::Audio(encoder) => encoder,
        }
    }
}

pub struct FfmpegEncoder {
    inner: EncoderType,
    time_base: Rational,
}

// All calls happen on the thread driving the session.
unsafe impl Send for FfmpegEncoder {}

impl FfmpegEncoder {
    pub fn open(settings: &EncoderSettings, decoder: &codec::Parameters) -> Result<Self> {
        let codec = ffmpeg_next::encoder::find(settings.codec)
            .ok_or(WriterError::EncoderNotFound(settings.kind))?;
        let source = codec::Context::from_parameters(decoder.clone())?.decoder();
        let context = codec::Context::new_with_codec(codec);

        let inner = match settings.kind {
            MediaKind::Audio => {
                let source = source.audio()?;
                let mut encoder = context.encoder().audio()?;
                let advertised = codec.audio().ok().and_then(|a| a.formats());
                encoder.set_rate(source.rate() as i32);
                unsafe {
                    check(ffi::av_channel_layout_copy(
                        &mut (*encoder.as_mut_ptr()).ch_layout,
                        &(*decoder.as_ptr()).ch_layout,
                    ))?;
                }
                encoder.set_format(first_or(advertised.into_iter().flatten(), source.format()));
                encoder.set_time_base(settings.time_base);
                if settings.global_header {
                    encoder.set_flags(codec::Flags::GLOBAL_HEADER);
                }
                EncoderType::Audio(encoder.open_as(codec)?)
            }
            MediaKind::Video => {
                let source = source.video()?;
                let mut encoder = context.encoder().video()?;
                let advertised = codec.video().ok().and_then(|v| v.formats());
                encoder.set_width(source.width());
                encoder.set_height(source.height());
                encoder.set_aspect_ratio(source.aspect_ratio());
                encoder.set_format(first_or(advertised.into_iter().flatten(), source.format()));
                encoder.set_time_base(settings.time_base);
                if settings.global_header {
                    encoder.set_flags(codec::Flags::GLOBAL_HEADER);
                }
                EncoderType::Video(encoder.open_as(codec)?)
            }
            MediaKind::Other => return Err(WriterError::Unsupported(settings.kind)),
        };

        // the encoder may have adjusted the time base while opening
        let time_base: Rational = unsafe { (*inner.context().as_ptr()).time_base.into() };
        log::info!(
            target: "ffmpeg_writer",
            "encoder opened: {:?} time base {}",
            settings.codec,
            time_base
        );
        Ok(Self { inner, time_base })
    }
}

impl FrameEncoder for FfmpegEncoder {
    type Frame = Frame;
    type Packet = Packet;
    type Parameters = codec::Parameters;

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn parameters(&self) -> Result<codec::Parameters> {
        let mut parameters = codec::Parameters::new();
        check(unsafe {
            ffi::avcodec_parameters_from_context(
                parameters.as_mut_ptr(),
                self.inner.context().as_ptr(),
            )
        })?;
        Ok(parameters)
    }

    fn send_frame(&mut self, frame: Option<&Frame>) -> Result<()> {
        let encoder = self.inner.encoder_mut();
        match frame {
            Some(frame) => encoder.send_frame(frame),
            None => encoder.send_eof(),
        }
        .map_err(|e| WriterError::Encoding(e.to_string()))
    }

    fn receive_packet(&mut self) -> Result<Option<Packet>> {
        let mut packet = Packet::empty();
        match self.inner.encoder_mut().receive_packet(&mut packet) {
            Ok(()) => Ok(Some(packet)),
            Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => Ok(None),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(e) => Err(WriterError::Encoding(e.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "ffmpeg_test.rs"]
mod ffmpeg_test;
