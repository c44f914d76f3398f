//! The output session: one container file, its tracks and their timing.

use ffmpeg_next::Rational;

use crate::{
    Result, WriterError,
    config::WriterConfig,
    encoder::{EncoderSettings, select_encoder},
    logger::{LogFacade, SessionLog},
    mapper::{TrackMapper, TrackMapping},
    media::{
        CodecParameters, ContainerOutput, FrameEncoder, MediaLibrary, MediaPacket, SourceTrack,
    },
    timestamp::{Verdict, rescale, seconds},
};

/// Writes the selected tracks of one camera into a container file.
///
/// Register tracks, `open`, submit packets or frames, `close`. Dropping the
/// writer closes it if still open and releases the container and encoders.
/// A writer is driven by one producer; it does no locking of its own.
pub struct StreamWriter<L: MediaLibrary> {
    library: L,
    config: WriterConfig,
    log: Box<dyn SessionLog>,
    path: String,
    output: Option<L::Output>,
    tracks: TrackMapper<L::Encoder>,
    file_opened: bool,
    // trailer already written on the current context
    finalized: bool,
}

impl<L: MediaLibrary> StreamWriter<L> {
    pub fn new(library: L, config: WriterConfig, path: &str) -> Self {
        Self {
            library,
            config,
            log: Box::new(LogFacade),
            path: path.to_string(),
            output: None,
            tracks: TrackMapper::new(),
            file_opened: false,
            finalized: false,
        }
    }

    pub fn with_logger<G: SessionLog + 'static>(mut self, log: G) -> Self {
        self.log = Box::new(log);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file_opened
    }

    pub fn has_context(&self) -> bool {
        self.output.is_some()
    }

    pub fn output_track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn output_index(&self, source_index: usize) -> Option<usize> {
        self.tracks.output_index(source_index)
    }

    pub fn mapping(&self, source_index: usize) -> Option<TrackMapping> {
        self.tracks.mapping(source_index).copied()
    }

    /// Last decode-time written on an output track.
    pub fn last_dts(&self, output_index: usize) -> Option<i64> {
        self.tracks
            .track(output_index)
            .and_then(|t| t.timing().last_dts())
    }

    pub fn open(&mut self) -> Result<()> {
        if self.file_opened {
            return Ok(());
        }
        if self.finalized {
            self.log.error(&format!(
                "Output {} was already finalized, change the path before reopening",
                self.path
            ));
            return Err(WriterError::Format(format!(
                "output {} already finalized",
                self.path
            )));
        }
        let Some(output) = self.output.as_mut() else {
            self.log
                .error("Cannot open output stream before any track is registered");
            return Err(WriterError::NoContext);
        };

        self.tracks.reset_timing();
        output.dump();

        if output.needs_file() {
            if let Err(e) = output.open_sink(&self.path) {
                self.log
                    .error(&format!("Could not open output file '{}'", self.path));
                self.log.error(&format!("Error occurred: {}", e));
                return Err(e);
            }
        }

        if let Err(e) = output.write_header() {
            output.close_sink();
            self.log.error("Error occurred when opening output file");
            self.log.error(&format!("Error occurred: {}", e));
            return Err(e);
        }

        self.file_opened = true;
        self.log.info(&format!(
            "Opened output {} with {} track(s) for camera {}",
            self.path,
            self.tracks.len(),
            self.config.camera_id
        ));
        Ok(())
    }

    /// Flush, write the trailer and release the sink. Closing a writer that is
    /// not open only logs a warning.
    pub fn close(&mut self) -> Result<()> {
        if !self.file_opened {
            self.log
                .warn("Attempted to close a output stream that wasn't open");
            return Ok(());
        }
        self.file_opened = false;
        let Some(output) = self.output.as_mut() else {
            return Ok(());
        };
        self.finalized = true;

        if let Err(e) = output.flush() {
            self.log.error(&format!(
                "Error flushing muxing output for camera {}: {}",
                self.config.camera_id, e
            ));
        }

        let result = output.write_trailer();
        output.close_sink();
        match &result {
            Ok(()) => self.log.info(&format!("Closed output {}", self.path)),
            Err(e) => self.log.error(&format!(
                "Error writing trailer for camera {}: {}",
                self.config.camera_id, e
            )),
        }
        result
    }

    /// Point the writer at a new file. Releases the current context, so tracks
    /// must be registered again before the next `open`. Empty paths are ignored.
    pub fn change_path(&mut self, new_path: &str) {
        if new_path.is_empty() {
            return;
        }
        if self.file_opened {
            self.log.warn(&format!(
                "Changing path of camera {} while {} is open, closing it first",
                self.config.camera_id, self.path
            ));
            if let Err(e) = self.close() {
                self.log
                    .error(&format!("Error closing {}: {}", self.path, e));
            }
        }
        self.path = new_path.to_string();
        self.free_context();
    }

    /// Release the sink, the container context, the track tables and every
    /// encoder. Safe to call when nothing is allocated.
    pub fn free_context(&mut self) {
        if let Some(mut output) = self.output.take() {
            output.close_sink();
        }
        self.tracks.clear();
        self.file_opened = false;
        self.finalized = false;
    }

    fn alloc_context(&mut self) -> Result<()> {
        if self.output.is_some() {
            return Ok(());
        }
        match self.library.alloc_output(&self.path) {
            Ok(output) => {
                self.output = Some(output);
                Ok(())
            }
            Err(e) => {
                self.log.error("Could not create output context");
                self.log.error(&format!("Error occurred: {}", e));
                Err(e)
            }
        }
    }

    /// Allocate an output stream for `source`. On failure the source is
    /// recorded as excluded.
    fn init_stream(&mut self, source: &SourceTrack<L::Parameters>) -> Result<usize> {
        let output = self.output.as_mut().ok_or(WriterError::NoContext)?;
        match output.add_stream() {
            Ok(output_index) => {
                self.tracks
                    .assign(source.index(), source.kind(), output_index, None);
                Ok(output_index)
            }
            Err(e) => {
                self.log.error("Failed allocating output stream");
                self.log.error(&format!("Error occurred: {}", e));
                self.tracks.exclude(source.index(), source.kind());
                Err(e)
            }
        }
    }

    /// Allocate an output stream for `source` that already carries
    /// `parameters`. A failed copy leaves the source unregistered, a failed
    /// allocation records it as excluded.
    fn init_configured_stream(
        &mut self,
        source: &SourceTrack<L::Parameters>,
        parameters: &L::Parameters,
        time_base: Rational,
        encoder: Option<L::Encoder>,
    ) -> Result<usize> {
        let output = self.output.as_mut().ok_or(WriterError::NoContext)?;
        match output.add_configured_stream(parameters, time_base) {
            Ok(output_index) => {
                self.tracks
                    .assign(source.index(), source.kind(), output_index, encoder);
                Ok(output_index)
            }
            Err(e @ WriterError::Allocation(_)) => {
                self.log.error("Failed allocating output stream");
                self.log.error(&format!("Error occurred: {}", e));
                self.tracks.exclude(source.index(), source.kind());
                Err(e)
            }
            Err(e) => {
                self.log.error("Failed to copy codec parameters");
                self.log.error(&format!("Error occurred: {}", e));
                Err(e)
            }
        }
    }

    /// Reserve an output track for `source`.
    ///
    /// Tracks that are neither audio nor video are recorded as excluded and
    /// yield `Ok(None)`. Registering a source twice returns its existing slot.
    pub fn register_passthrough_track(
        &mut self,
        source: &SourceTrack<L::Parameters>,
    ) -> Result<Option<usize>> {
        self.alloc_context()?;
        if let Some(existing) = self.tracks.mapping(source.index()) {
            return Ok(existing.output_index);
        }
        if !source.kind().is_recordable() {
            self.log.debug(&format!(
                "Skipping {} track {} for camera {}",
                source.kind(),
                source.index(),
                self.config.camera_id
            ));
            self.tracks.exclude(source.index(), source.kind());
            return Ok(None);
        }
        self.init_stream(source).map(Some)
    }

    /// Copy the source's codec parameters onto its output track.
    ///
    /// On failure the slot stays registered without parameters and the copy
    /// can be retried; the container refuses to open until it succeeds.
    pub fn copy_track_parameters(&mut self, source: &SourceTrack<L::Parameters>) -> Result<()> {
        let output_index = self
            .tracks
            .output_index(source.index())
            .ok_or(WriterError::UnmappedTrack(source.index()))?;
        let output = self.output.as_mut().ok_or(WriterError::NoContext)?;
        if let Err(e) = output.copy_parameters(output_index, source.parameters()) {
            self.log.error("Failed to copy codec parameters");
            self.log.error(&format!("Error occurred: {}", e));
            return Err(e);
        }
        output.set_time_base(output_index, source.time_base());
        Ok(())
    }

    /// Register a passthrough track and copy its parameters.
    ///
    /// A new output stream is only added together with its parameters, so a
    /// failed copy leaves the source unregistered and the context openable.
    pub fn add_track(&mut self, source: &SourceTrack<L::Parameters>) -> Result<Option<usize>> {
        self.alloc_context()?;
        if self.tracks.mapping(source.index()).is_none() && source.kind().is_recordable() {
            return self
                .init_configured_stream(source, source.parameters(), source.time_base(), None)
                .map(Some);
        }
        let Some(output_index) = self.register_passthrough_track(source)? else {
            return Ok(None);
        };
        self.copy_track_parameters(source)?;
        Ok(Some(output_index))
    }

    /// Add every source as a passthrough track. Returns how many output tracks
    /// were created; failures are logged and skipped.
    pub fn copy_tracks<'a, I>(&mut self, sources: I) -> usize
    where
        I: IntoIterator<Item = &'a SourceTrack<L::Parameters>>,
        L::Parameters: 'a,
    {
        let mut created = 0;
        for source in sources {
            match self.add_track(source) {
                Ok(Some(_)) => created += 1,
                Ok(None) => {}
                Err(e) => self.log.error(&format!(
                    "Could not add source track {} for camera {}: {}",
                    source.index(),
                    self.config.camera_id,
                    e
                )),
            }
        }
        created
    }

    /// Reserve an output track for `source` that re-encodes decoded frames.
    ///
    /// The encoder is picked and opened before the output stream is allocated,
    /// so a missing or broken encoder, or parameters that cannot be copied,
    /// leave no stream behind and the source unregistered.
    pub fn register_transcoded_track(
        &mut self,
        source: &SourceTrack<L::Parameters>,
        decoder: Option<&L::Parameters>,
    ) -> Result<Option<usize>> {
        let Some(decoder) = decoder else {
            return Err(WriterError::MissingDecoderParameters(source.index()));
        };
        self.alloc_context()?;
        if let Some(existing) = self.tracks.mapping(source.index()) {
            return match existing.output_index {
                Some(index) if self.tracks.track(index).is_some_and(|t| t.is_transcoded()) => {
                    Ok(Some(index))
                }
                Some(_) => Err(WriterError::NotTranscoded(source.index())),
                None => Ok(None),
            };
        }
        if !source.kind().is_recordable() {
            self.tracks.exclude(source.index(), source.kind());
            return Ok(None);
        }

        let output = self.output.as_ref().ok_or(WriterError::NoContext)?;
        let global_header = output.global_header();
        let kind = decoder.kind();
        let codec = match select_encoder(kind, &self.config, |id| self.library.has_encoder(id)) {
            Ok(codec) => codec,
            Err(e) => {
                self.log.warn(&format!("Could not find {} encoder", kind));
                return Err(e);
            }
        };
        let settings = EncoderSettings::new(codec, decoder, source.time_base(), global_header)?;
        let encoder = match self.library.open_encoder(&settings, decoder) {
            Ok(encoder) => encoder,
            Err(e) => {
                self.log.error(&format!(
                    "Cannot open {:?} encoder for source track {}: {}",
                    codec,
                    source.index(),
                    e
                ));
                return Err(e);
            }
        };
        let time_base = encoder.time_base();
        let configured = encoder.parameters().and_then(|parameters| {
            self.init_configured_stream(source, &parameters, time_base, Some(encoder))
        });
        let output_index = match configured {
            Ok(output_index) => output_index,
            Err(e) => {
                self.log.error(&format!(
                    "Could not add output track for transcoded source track {}",
                    source.index()
                ));
                return Err(e);
            }
        };
        self.log.info(&format!(
            "Transcoding source track {} to {:?} on output track {} for camera {}",
            source.index(),
            codec,
            output_index,
            self.config.camera_id
        ));
        Ok(Some(output_index))
    }

    /// Write an encoded packet read from `source`.
    ///
    /// Packets of excluded or unknown tracks are dropped and reported as
    /// success. Late packets are moved forward, duplicates are dropped.
    pub fn write(&mut self, packet: &L::Packet, source: &SourceTrack<L::Parameters>) -> Result<()> {
        self.write_packet(packet, source.time_base())
    }

    /// Write an encoded packet whose timestamps are in `time_base`. The packet's
    /// stream index must be the source track index.
    pub fn write_packet(&mut self, packet: &L::Packet, time_base: Rational) -> Result<()> {
        if !self.file_opened {
            return Err(WriterError::NotOpen);
        }
        let mut out_pkt = match packet.duplicate() {
            Ok(p) => p,
            Err(e) => {
                self.log
                    .error("Could not allocate new output packet for writing");
                return Err(e);
            }
        };

        let source_index = out_pkt.stream();
        let Some(output_index) = self.tracks.output_index(source_index) else {
            return Ok(());
        };
        let output = self.output.as_mut().ok_or(WriterError::NoContext)?;
        let out_time_base = output.time_base(output_index);

        trace_packet(&*self.log, "in", &out_pkt, time_base, &self.path);
        out_pkt.set_stream(output_index);
        out_pkt.set_pts(out_pkt.pts().map(|v| rescale(v, time_base, out_time_base)));
        out_pkt.set_dts(out_pkt.dts().map(|v| rescale(v, time_base, out_time_base)));
        out_pkt.set_duration(rescale(out_pkt.duration(), time_base, out_time_base));
        out_pkt.set_position(-1);

        let mut pts = out_pkt.pts();
        let mut dts = out_pkt.dts();
        let track = self
            .tracks
            .track_mut(output_index)
            .ok_or(WriterError::UnmappedTrack(source_index))?;
        match track.timing_mut().correct(&mut pts, &mut dts) {
            Verdict::Accepted => {}
            Verdict::Shifted { from: Some(old) } => self.log.warn(&format!(
                "Shifting frame timestamp due to out of order issue in camera {} track {}, \
                 old dts was: {}",
                self.config.camera_id, output_index, old
            )),
            Verdict::Shifted { from: None } => self.log.warn(&format!(
                "Packet without dts from camera {} track {}, assigned dts: {}",
                self.config.camera_id,
                output_index,
                dts.unwrap_or_default()
            )),
            Verdict::Duplicate => {
                self.log.warn(&format!(
                    "Received duplicate frame from camera {} track {} at dts: {}. Dropping Frame",
                    self.config.camera_id,
                    output_index,
                    dts.unwrap_or_default()
                ));
                return Ok(());
            }
        }
        out_pkt.set_pts(pts);
        out_pkt.set_dts(dts);
        trace_packet(&*self.log, "out", &out_pkt, out_time_base, &self.path);

        if let Err(e) = output.write_interleaved(&mut out_pkt) {
            self.log.error(&format!(
                "Error muxing packet for camera {}",
                self.config.camera_id
            ));
            return Err(WriterError::Muxing {
                camera: self.config.camera_id.clone(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Encode a raw frame of `source` and write whatever the encoder emits.
    /// `None` flushes the encoder.
    ///
    /// Frame timestamps must be in the encoder's time base (see
    /// [`Self::encoder_time_base`]).
    pub fn write_frame(
        &mut self,
        frame: Option<&L::Frame>,
        source: &SourceTrack<L::Parameters>,
    ) -> Result<()> {
        let Some(output_index) = self.tracks.output_index(source.index()) else {
            return Ok(());
        };
        if !self.file_opened {
            return Err(WriterError::NotOpen);
        }
        let encoder = self
            .tracks
            .track_mut(output_index)
            .and_then(|t| t.encoder_mut())
            .ok_or(WriterError::NotTranscoded(source.index()))?;
        if let Err(e) = encoder.send_frame(frame) {
            self.log
                .warn(&format!("Error during encoding. Error code: {}", e));
            return Err(e);
        }
        self.drain_encoder(output_index, source.index())
    }

    /// Time base frames for `source` must carry, if it is transcoded.
    pub fn encoder_time_base(&self, source_index: usize) -> Option<Rational> {
        let output_index = self.tracks.output_index(source_index)?;
        self.tracks
            .track(output_index)?
            .encoder()
            .map(|e| e.time_base())
    }

    fn drain_encoder(&mut self, output_index: usize, source_index: usize) -> Result<()> {
        loop {
            let (received, time_base) = {
                let encoder = self
                    .tracks
                    .track_mut(output_index)
                    .and_then(|t| t.encoder_mut())
                    .ok_or(WriterError::NotTranscoded(source_index))?;
                (encoder.receive_packet(), encoder.time_base())
            };
            match received {
                Ok(Some(mut packet)) => {
                    // the write path maps the source index again
                    packet.set_stream(source_index);
                    self.write_packet(&packet, time_base)?;
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.log
                        .warn(&format!("Error receiving encoded packet: {}", e));
                    return Err(e);
                }
            }
        }
    }

    /// Send end of stream to every encoder and write what they still hold.
    pub fn flush_encoders(&mut self) -> Result<()> {
        if !self.file_opened {
            return Err(WriterError::NotOpen);
        }
        let transcoded: Vec<(usize, usize)> = (0..self.tracks.len())
            .filter_map(|i| {
                self.tracks
                    .track(i)
                    .filter(|t| t.is_transcoded())
                    .map(|t| (i, t.source_index()))
            })
            .collect();
        for (output_index, source_index) in transcoded {
            if let Some(encoder) = self
                .tracks
                .track_mut(output_index)
                .and_then(|t| t.encoder_mut())
            {
                encoder.send_frame(None)?;
            }
            self.drain_encoder(output_index, source_index)?;
        }
        Ok(())
    }
}

fn trace_packet<P: MediaPacket>(
    log: &dyn SessionLog,
    tag: &str,
    packet: &P,
    time_base: Rational,
    path: &str,
) {
    if !log.enabled(log::Level::Debug) {
        return;
    }
    log.debug(&format!(
        "{}: {}: pts:{} pts_time:{} dts:{} dts_time:{} \
         duration:{} duration_time:{} stream_index:{}",
        tag,
        path,
        packet.pts().map_or("NOPTS".to_string(), |v| v.to_string()),
        seconds(packet.pts(), time_base),
        packet.dts().map_or("NOPTS".to_string(), |v| v.to_string()),
        seconds(packet.dts(), time_base),
        packet.duration(),
        seconds(Some(packet.duration()), time_base),
        packet.stream()
    ));
}

impl<L: MediaLibrary> Drop for StreamWriter<L> {
    fn drop(&mut self) {
        if self.file_opened {
            let _ = self.close();
        }
        self.free_context();
    }
}

#[cfg(test)]
#[path = "writer_test.rs"]
mod writer_test;
