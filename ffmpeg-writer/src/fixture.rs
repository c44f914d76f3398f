//! Synthetic camera clips for FFmpeg-backed tests.
//!
//! Video is MPEG-4 Part 2 and audio is AAC, both encoders FFmpeg ships
//! natively, so the tests need neither media files nor external codecs.

use std::path::Path;

use ffmpeg_next::{Packet, Rational, codec, encoder, ffi, format, frame};

use crate::{Result, WriterError, ffmpeg::check, media::MediaKind};

pub const FPS: i32 = 10;
pub const SAMPLE_RATE: i32 = 48000;
pub const WIDTH: u32 = 160;
pub const HEIGHT: u32 = 120;

/// What [`write_clip`] puts into the file.
#[derive(Debug, Clone, Copy)]
pub struct Clip {
    pub seconds: i64,
    /// Add a stereo AAC track of silence after the video track.
    pub audio: bool,
}

/// Write `clip` to `path`; the extension picks the container. The video
/// track has a keyframe at every full second.
pub fn write_clip(path: &Path, clip: Clip) -> Result<()> {
    let mut octx = format::output(path)?;
    let global_header = octx
        .format()
        .flags()
        .contains(format::Flags::GLOBAL_HEADER);

    let mut video = open_video(&mut octx, global_header)?;
    let mut audio = if clip.audio {
        Some(open_audio(&mut octx, global_header)?)
    } else {
        None
    };
    octx.write_header()?;

    let mut samples: i64 = 0;
    for index in 0..clip.seconds * FPS as i64 {
        let mut picture = frame::Video::new(format::Pixel::YUV420P, WIDTH, HEIGHT);
        let luma = (16 + index * 2 % 200) as u8;
        picture.data_mut(0).fill(luma);
        picture.data_mut(1).fill(128);
        picture.data_mut(2).fill(128);
        picture.set_pts(Some(index));
        video.encoder.send_frame(&picture)?;
        video.drain(&mut octx)?;

        if let Some(audio) = audio.as_mut() {
            let until = (index + 1) * SAMPLE_RATE as i64 / FPS as i64;
            while samples < until {
                let frame = silence(audio.frame_size, samples)?;
                audio.encoder.send_frame(&frame)?;
                audio.drain(&mut octx)?;
                samples += audio.frame_size as i64;
            }
        }
    }

    video.encoder.send_eof()?;
    video.drain(&mut octx)?;
    if let Some(audio) = audio.as_mut() {
        audio.encoder.send_eof()?;
        audio.drain(&mut octx)?;
    }
    octx.write_trailer()?;
    Ok(())
}

struct Track<E> {
    encoder: E,
    stream: usize,
    time_base: Rational,
    frame_size: usize,
}

impl<E> Track<E>
where
    E: std::ops::DerefMut,
    E::Target: std::ops::DerefMut<Target = encoder::Encoder>,
{
    fn drain(&mut self, octx: &mut format::context::Output) -> Result<()> {
        let stream_time_base = octx
            .stream(self.stream)
            .map(|s| s.time_base())
            .ok_or_else(|| WriterError::Format(format!("no stream {}", self.stream)))?;
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream);
            packet.rescale_ts(self.time_base, stream_time_base);
            packet.write_interleaved(octx)?;
        }
        Ok(())
    }
}

fn open_video(
    octx: &mut format::context::Output,
    global_header: bool,
) -> Result<Track<encoder::video::Encoder>> {
    let codec =
        encoder::find(codec::Id::MPEG4).ok_or(WriterError::EncoderNotFound(MediaKind::Video))?;
    let time_base = Rational::new(1, FPS);

    let mut video = codec::Context::new_with_codec(codec).encoder().video()?;
    video.set_width(WIDTH);
    video.set_height(HEIGHT);
    video.set_format(format::Pixel::YUV420P);
    video.set_time_base(time_base);
    video.set_frame_rate(Some(Rational::new(FPS, 1)));
    video.set_gop(FPS as u32);
    video.set_max_b_frames(0);
    if global_header {
        video.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let encoder = video.open_as(codec)?;

    let mut stream = octx.add_stream(codec)?;
    stream.set_parameters(&encoder);
    stream.set_time_base(time_base);
    Ok(Track {
        encoder,
        stream: stream.index(),
        time_base,
        frame_size: 0,
    })
}

fn open_audio(
    octx: &mut format::context::Output,
    global_header: bool,
) -> Result<Track<encoder::audio::Encoder>> {
    let codec =
        encoder::find(codec::Id::AAC).ok_or(WriterError::EncoderNotFound(MediaKind::Audio))?;
    let time_base = Rational::new(1, SAMPLE_RATE);

    let mut audio = codec::Context::new_with_codec(codec).encoder().audio()?;
    audio.set_rate(SAMPLE_RATE);
    audio.set_format(format::Sample::F32(format::sample::Type::Planar));
    audio.set_time_base(time_base);
    audio.set_bit_rate(64_000);
    unsafe { ffi::av_channel_layout_default(&mut (*audio.as_mut_ptr()).ch_layout, 2) };
    if global_header {
        audio.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let encoder = audio.open_as(codec)?;
    let frame_size = (encoder.frame_size() as usize).max(1);

    let mut stream = octx.add_stream(codec)?;
    stream.set_parameters(&encoder);
    stream.set_time_base(time_base);
    Ok(Track {
        encoder,
        stream: stream.index(),
        time_base,
        frame_size,
    })
}

/// Stereo planar float silence, `samples` long, starting at sample `pts`.
fn silence(samples: usize, pts: i64) -> Result<frame::Audio> {
    let fltp = ffi::AVSampleFormat::AV_SAMPLE_FMT_FLTP;
    let mut frame = frame::Audio::empty();
    unsafe {
        let ptr = frame.as_mut_ptr();
        (*ptr).format = fltp as i32;
        (*ptr).nb_samples = samples as i32;
        (*ptr).sample_rate = SAMPLE_RATE;
        ffi::av_channel_layout_default(&mut (*ptr).ch_layout, 2);
        check(ffi::av_frame_get_buffer(ptr, 0))?;
        check(ffi::av_samples_set_silence(
            (*ptr).extended_data,
            0,
            samples as i32,
            2,
            fltp,
        ))?;
    }
    frame.set_pts(Some(pts));
    Ok(frame)
}
