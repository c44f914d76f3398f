use std::collections::HashMap;

use ffmpeg_next::{
    codec::{self, Parameters},
    format::Sample,
    util::mathematics::rescale::TIME_BASE,
    Packet,
};
use ffmpeg_writer::{
    encoder::select_encoder, timestamp::rescale, FfmpegLibrary, MediaKind, MediaLibrary,
    SourceTrack, StreamWriter,
};
use tokio_util::sync::CancellationToken;

use crate::{config::RecorderConfig, decode::Decoder, source::AvInput};

type Writer = StreamWriter<FfmpegLibrary>;

/// Decides where segments end, on media time in microseconds.
struct SegmentClock {
    length: i64,
    start: Option<i64>,
}

impl SegmentClock {
    fn new(seconds: u64) -> Self {
        Self {
            length: (seconds as i64).saturating_mul(1_000_000),
            start: None,
        }
    }

    /// Called with the time of each packet a segment may start at. True when
    /// the current segment is full; `now` then starts the next one.
    fn should_rotate(&mut self, now: Option<i64>) -> bool {
        let Some(now) = now else {
            return false;
        };
        match self.start {
            Some(start) if now - start >= self.length => {
                self.start = Some(now);
                true
            }
            // first boundary, or the source restarted its clock
            Some(start) if now >= start => false,
            _ => {
                self.start = Some(now);
                false
            }
        }
    }
}

/// Decoded audio goes to the encoder without resampling, so the encoder must
/// take the decoded sample format (`accepted` is the one it will be opened
/// with) and the decoded frame size. Frames of a decoder for the same codec
/// have the encoder's frame size.
fn fits_encoder(
    decoded: Option<Sample>,
    accepted: Option<Sample>,
    same_codec: bool,
    variable_frame_size: bool,
) -> bool {
    let format_fits = match accepted {
        Some(accepted) => decoded == Some(accepted),
        None => decoded.is_some(),
    };
    format_fits && (same_codec || variable_frame_size)
}

/// Records one camera input into fixed-length segments.
///
/// Blocking; run it on a dedicated thread.
pub struct Recorder {
    config: RecorderConfig,
    cancel: CancellationToken,
}

impl Recorder {
    pub fn new(config: RecorderConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn run(self) -> anyhow::Result<usize> {
        let format = self.config.input_format.as_deref();
        let mut input = AvInput::new(&self.config.input, format, None)?;
        let sources = input.streams().to_vec();
        let has_video = sources.iter().any(|s| s.is_video());
        std::fs::create_dir_all(&self.config.output_dir)?;

        let mut segment = 0;
        let mut writer = StreamWriter::new(
            FfmpegLibrary,
            self.config.writer.clone(),
            &self.segment_path(segment),
        );
        let mut decoders = HashMap::new();
        self.register(&mut writer, &sources, &mut decoders)?;
        writer.open()?;
        log::info!(
            "recording camera {} from {} into {}",
            self.config.writer.camera_id,
            self.config.input,
            writer.path()
        );

        let mut clock = SegmentClock::new(self.config.segment_seconds);
        while !self.cancel.is_cancelled() {
            let Some(packet) = input.read_packet() else {
                log::info!("end of input {}", self.config.input);
                break;
            };
            let Some(source) = sources.get(packet.stream()) else {
                continue;
            };

            let boundary = packet.is_key() && (source.is_video() || !has_video);
            if boundary {
                let now = packet
                    .dts()
                    .or(packet.pts())
                    .map(|ts| rescale(ts, source.time_base(), TIME_BASE));
                if clock.should_rotate(now) {
                    segment += 1;
                    self.rotate(&mut writer, &sources, &mut decoders, segment)?;
                }
            }

            match decoders.get_mut(&source.index()) {
                Some(decoder) => self.transcode(&mut writer, decoder, Some(&packet), source),
                None => {
                    if let Err(e) = writer.write(&packet, source) {
                        log::warn!("dropping packet of track {}: {}", source.index(), e);
                    }
                }
            }
        }

        self.finish(&mut writer, &sources, &mut decoders)?;
        Ok(segment as usize + 1)
    }

    fn segment_path(&self, segment: u64) -> String {
        self.config.segment_path(segment).to_string_lossy().into_owned()
    }

    /// Passthrough for every track, except audio when transcoding is enabled.
    /// Audio the encoder cannot take as decoded, or whose encoder cannot be
    /// set up, is copied instead.
    fn register(
        &self,
        writer: &mut Writer,
        sources: &[SourceTrack<Parameters>],
        decoders: &mut HashMap<usize, Decoder>,
    ) -> anyhow::Result<()> {
        for source in sources {
            if self.config.transcode_audio && source.is_audio() {
                if self.prepare_decoder(source, decoders) {
                    match writer.register_transcoded_track(source, Some(source.parameters())) {
                        Ok(_) => continue,
                        Err(e) => {
                            log::warn!(
                                "copying audio track {} instead of transcoding: {}",
                                source.index(),
                                e
                            );
                            decoders.remove(&source.index());
                        }
                    }
                }
            }
            if let Err(e) = writer.add_track(source) {
                log::error!("cannot record track {}: {}", source.index(), e);
            }
        }
        if writer.output_track_count() == 0 {
            anyhow::bail!("no recordable track in {}", self.config.input);
        }
        Ok(())
    }

    /// True when `decoders` holds a decoder for `source` whose frames the
    /// audio encoder takes unconverted.
    fn prepare_decoder(
        &self,
        source: &SourceTrack<Parameters>,
        decoders: &mut HashMap<usize, Decoder>,
    ) -> bool {
        if decoders.contains_key(&source.index()) {
            return true;
        }
        let decoder = match Decoder::new(source) {
            Ok(decoder) => decoder,
            Err(e) => {
                log::warn!("cannot decode track {}: {}", source.index(), e);
                return false;
            }
        };
        let Ok(id) = select_encoder(MediaKind::Audio, &self.config.writer, |id| {
            FfmpegLibrary.has_encoder(id)
        }) else {
            return false;
        };
        let Some(codec) = ffmpeg_next::encoder::find(id) else {
            return false;
        };
        let variable_frame_size = codec
            .capabilities()
            .contains(codec::Capabilities::VARIABLE_FRAME_SIZE);
        let accepted = codec
            .audio()
            .ok()
            .and_then(|audio| audio.formats())
            .and_then(|mut formats| formats.next());
        let fits = fits_encoder(
            decoder.sample_format(),
            accepted,
            source.parameters().id() == id,
            variable_frame_size,
        );
        if !fits {
            log::warn!(
                "copying audio track {}: {:?} frames do not fit the {:?} encoder",
                source.index(),
                decoder.sample_format(),
                id
            );
            return false;
        }
        decoders.insert(source.index(), decoder);
        true
    }

    fn rotate(
        &self,
        writer: &mut Writer,
        sources: &[SourceTrack<Parameters>],
        decoders: &mut HashMap<usize, Decoder>,
        segment: u64,
    ) -> anyhow::Result<()> {
        if let Err(e) = writer.flush_encoders() {
            log::warn!("flushing encoders of {}: {}", writer.path(), e);
        }
        if let Err(e) = writer.close() {
            log::error!("closing {}: {}", writer.path(), e);
        }
        writer.change_path(&self.segment_path(segment));
        self.register(writer, sources, decoders)?;
        writer.open()?;
        log::info!("started segment {}", writer.path());
        Ok(())
    }

    /// Decode `packet` (or drain the decoder on `None`) and hand the frames to
    /// the writer in the encoder's time base.
    fn transcode(
        &self,
        writer: &mut Writer,
        decoder: &mut Decoder,
        packet: Option<&Packet>,
        source: &SourceTrack<Parameters>,
    ) {
        let sent = match packet {
            Some(packet) => decoder.send_packet(packet),
            None => decoder.send_eof(),
        };
        if let Err(e) = sent {
            log::warn!("decoding track {}: {}", decoder.stream_index(), e);
            return;
        }
        let Some(encoder_tb) = writer.encoder_time_base(source.index()) else {
            return;
        };
        loop {
            match decoder.receive_frame() {
                Ok(Some(mut frame)) => {
                    let pts = frame
                        .timestamp()
                        .map(|ts| rescale(ts, decoder.time_base(), encoder_tb));
                    frame.set_pts(pts);
                    if let Err(e) = writer.write_frame(Some(&*frame), source) {
                        log::warn!("dropping frame of track {}: {}", source.index(), e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("decoding track {}: {}", decoder.stream_index(), e);
                    break;
                }
            }
        }
    }

    fn finish(
        &self,
        writer: &mut Writer,
        sources: &[SourceTrack<Parameters>],
        decoders: &mut HashMap<usize, Decoder>,
    ) -> anyhow::Result<()> {
        for (index, decoder) in decoders.iter_mut() {
            if let Some(source) = sources.get(*index) {
                self.transcode(writer, decoder, None, source);
            }
        }
        if let Err(e) = writer.flush_encoders() {
            log::warn!("flushing encoders of {}: {}", writer.path(), e);
        }
        writer.close()?;
        log::info!("stopped recording camera {}", self.config.writer.camera_id);
        Ok(())
    }
}

#[cfg(test)]
#[path = "recorder_test.rs"]
mod recorder_test;
