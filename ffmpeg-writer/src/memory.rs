//! In-memory media library.
//!
//! Every output it allocates is recorded as a [`RecordedFile`] that stays
//! readable through any clone of the [`MemoryLibrary`]. Individual primitives
//! can be made to fail through [`Failures`]. The container rejects packets
//! whose decode-time does not increase, like a real muxer would.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use ffmpeg_next::{Rational, codec};

use crate::{
    Result, WriterError,
    encoder::EncoderSettings,
    media::{CodecParameters, ContainerOutput, FrameEncoder, MediaKind, MediaLibrary, MediaPacket},
};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryParameters {
    pub kind: MediaKind,
    pub codec: codec::Id,
    pub sample_rate: i32,
    pub width: u32,
    pub height: u32,
    pub codec_tag: u32,
}

impl MemoryParameters {
    pub fn video(codec: codec::Id, width: u32, height: u32) -> Self {
        Self {
            kind: MediaKind::Video,
            codec,
            sample_rate: 0,
            width,
            height,
            codec_tag: 0,
        }
    }

    pub fn audio(codec: codec::Id, sample_rate: i32) -> Self {
        Self {
            kind: MediaKind::Audio,
            codec,
            sample_rate,
            width: 0,
            height: 0,
            codec_tag: 0,
        }
    }

    pub fn data() -> Self {
        Self {
            kind: MediaKind::Other,
            codec: codec::Id::None,
            sample_rate: 0,
            width: 0,
            height: 0,
            codec_tag: 0,
        }
    }

    pub fn with_codec_tag(mut self, tag: u32) -> Self {
        self.codec_tag = tag;
        self
    }
}

impl CodecParameters for MemoryParameters {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn sample_rate(&self) -> i32 {
        self.sample_rate
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryPacket {
    pub stream: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub position: i64,
    pub key: bool,
    pub data: Bytes,
}

impl MemoryPacket {
    pub fn new(stream: usize, pts: i64, dts: i64) -> Self {
        Self {
            stream,
            pts: Some(pts),
            dts: Some(dts),
            duration: 0,
            position: 0,
            key: false,
            data: Bytes::new(),
        }
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }
}

impl MediaPacket for MemoryPacket {
    fn stream(&self) -> usize {
        self.stream
    }

    fn set_stream(&mut self, index: usize) {
        self.stream = index;
    }

    fn pts(&self) -> Option<i64> {
        self.pts
    }

    fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    fn dts(&self) -> Option<i64> {
        self.dts
    }

    fn set_dts(&mut self, dts: Option<i64>) {
        self.dts = dts;
    }

    fn duration(&self) -> i64 {
        self.duration
    }

    fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    fn set_position(&mut self, position: i64) {
        self.position = position;
    }

    fn duplicate(&self) -> Result<Self> {
        Ok(self.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryFrame {
    pub pts: Option<i64>,
    pub data: Bytes,
}

impl MemoryFrame {
    pub fn new(pts: i64) -> Self {
        Self {
            pts: Some(pts),
            data: Bytes::new(),
        }
    }
}

/// Which primitives should fail.
#[derive(Debug, Clone, Default)]
pub struct Failures {
    pub alloc_output: bool,
    pub add_stream: bool,
    pub copy_parameters: bool,
    pub open_sink: bool,
    pub write_header: bool,
    pub write_packet: bool,
    pub flush: bool,
    pub write_trailer: bool,
    pub open_encoder: bool,
    pub encode: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStream {
    pub parameters: Option<MemoryParameters>,
    pub time_base: Rational,
}

#[derive(Debug, Clone, Default)]
pub struct RecordedFile {
    pub path: String,
    pub streams: Vec<RecordedStream>,
    pub packets: Vec<MemoryPacket>,
    pub sink_open: bool,
    pub header_written: bool,
    pub trailer_written: bool,
    pub flushes: usize,
    /// The output context has been dropped.
    pub freed: bool,
}

impl RecordedFile {
    pub fn packets_for(&self, stream: usize) -> Vec<&MemoryPacket> {
        self.packets.iter().filter(|p| p.stream == stream).collect()
    }

    pub fn dts_for(&self, stream: usize) -> Vec<i64> {
        self.packets_for(stream)
            .iter()
            .filter_map(|p| p.dts)
            .collect()
    }

    pub fn pts_for(&self, stream: usize) -> Vec<i64> {
        self.packets_for(stream)
            .iter()
            .filter_map(|p| p.pts)
            .collect()
    }
}

#[derive(Debug)]
struct LibraryState {
    files: Vec<RecordedFile>,
    failures: Failures,
    encoders: Vec<codec::Id>,
    opened_encoders: Vec<EncoderSettings>,
    needs_file: bool,
    global_header: bool,
    container_time_base: Option<Rational>,
    encoder_delay: usize,
}

/// Cloning shares the recorded state.
#[derive(Debug, Clone)]
pub struct MemoryLibrary {
    state: Arc<Mutex<LibraryState>>,
}

impl Default for MemoryLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLibrary {
    /// Offers AAC and H.264 encoders and writes to a file sink.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LibraryState {
                files: Vec::new(),
                failures: Failures::default(),
                encoders: vec![codec::Id::AAC, codec::Id::H264],
                opened_encoders: Vec::new(),
                needs_file: true,
                global_header: false,
                container_time_base: None,
                encoder_delay: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, LibraryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_encoders(self, encoders: &[codec::Id]) -> Self {
        self.state().encoders = encoders.to_vec();
        self
    }

    pub fn with_global_header(self, global_header: bool) -> Self {
        self.state().global_header = global_header;
        self
    }

    /// Container without a file sink, writing through an existing handle.
    pub fn without_file(self) -> Self {
        self.state().needs_file = false;
        self
    }

    /// Every stream's time base is replaced by `time_base` when the header is
    /// written, the way muxers pick their own.
    pub fn with_container_time_base(self, time_base: Rational) -> Self {
        self.state().container_time_base = Some(time_base);
        self
    }

    /// Encoders hold back `frames` frames until flushed.
    pub fn with_encoder_delay(self, frames: usize) -> Self {
        self.state().encoder_delay = frames;
        self
    }

    pub fn set_failures(&self, failures: Failures) {
        self.state().failures = failures;
    }

    pub fn files(&self) -> Vec<RecordedFile> {
        self.state().files.clone()
    }

    pub fn last_file(&self) -> Option<RecordedFile> {
        self.state().files.last().cloned()
    }

    pub fn opened_encoders(&self) -> Vec<EncoderSettings> {
        self.state().opened_encoders.clone()
    }
}

fn failure(what: &str) -> WriterError {
    WriterError::Format(format!("{} failed", what))
}

impl MediaLibrary for MemoryLibrary {
    type Parameters = MemoryParameters;
    type Packet = MemoryPacket;
    type Frame = MemoryFrame;
    type Output = MemoryOutput;
    type Encoder = MemoryEncoder;

    fn alloc_output(&self, path: &str) -> Result<MemoryOutput> {
        let mut state = self.state();
        if state.failures.alloc_output {
            return Err(WriterError::Allocation("output context".to_string()));
        }
        state.files.push(RecordedFile {
            path: path.to_string(),
            ..Default::default()
        });
        Ok(MemoryOutput {
            state: Arc::clone(&self.state),
            file: state.files.len() - 1,
            needs_file: state.needs_file,
            global_header: state.global_header,
        })
    }

    fn has_encoder(&self, codec: codec::Id) -> bool {
        self.state().encoders.contains(&codec)
    }

    fn open_encoder(
        &self,
        settings: &EncoderSettings,
        decoder: &MemoryParameters,
    ) -> Result<MemoryEncoder> {
        let mut state = self.state();
        if state.failures.open_encoder {
            return Err(WriterError::Encoding(format!(
                "cannot open {:?}",
                settings.codec
            )));
        }
        state.opened_encoders.push(*settings);
        Ok(MemoryEncoder {
            state: Arc::clone(&self.state),
            settings: *settings,
            parameters: MemoryParameters {
                codec: settings.codec,
                ..decoder.clone()
            },
            queue: VecDeque::new(),
            delay: state.encoder_delay,
            eof: false,
        })
    }
}

pub struct MemoryOutput {
    state: Arc<Mutex<LibraryState>>,
    file: usize,
    needs_file: bool,
    global_header: bool,
}

impl MemoryOutput {
    fn with_file<T>(&self, f: impl FnOnce(&mut RecordedFile, &Failures) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let LibraryState { files, failures, .. } = &mut *state;
        f(&mut files[self.file], failures)
    }

    fn container_time_base(&self) -> Option<Rational> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .container_time_base
    }
}

impl ContainerOutput for MemoryOutput {
    type Parameters = MemoryParameters;
    type Packet = MemoryPacket;

    fn needs_file(&self) -> bool {
        self.needs_file
    }

    fn global_header(&self) -> bool {
        self.global_header
    }

    fn open_sink(&mut self, path: &str) -> Result<()> {
        self.with_file(|file, failures| {
            if failures.open_sink {
                return Err(WriterError::Io {
                    path: path.to_string(),
                    reason: "permission denied".to_string(),
                });
            }
            file.sink_open = true;
            Ok(())
        })
    }

    fn close_sink(&mut self) {
        self.with_file(|file, _| file.sink_open = false);
    }

    fn add_stream(&mut self) -> Result<usize> {
        self.with_file(|file, failures| {
            if failures.add_stream {
                return Err(WriterError::Allocation("stream".to_string()));
            }
            file.streams.push(RecordedStream {
                parameters: None,
                time_base: Rational::new(1, 1000),
            });
            Ok(file.streams.len() - 1)
        })
    }

    fn add_configured_stream(
        &mut self,
        parameters: &MemoryParameters,
        time_base: Rational,
    ) -> Result<usize> {
        self.with_file(|file, failures| {
            if failures.copy_parameters {
                return Err(failure("parameter copy"));
            }
            if failures.add_stream {
                return Err(WriterError::Allocation("stream".to_string()));
            }
            file.streams.push(RecordedStream {
                parameters: Some(parameters.clone().with_codec_tag(0)),
                time_base,
            });
            Ok(file.streams.len() - 1)
        })
    }

    fn stream_count(&self) -> usize {
        self.with_file(|file, _| file.streams.len())
    }

    fn copy_parameters(&mut self, index: usize, parameters: &MemoryParameters) -> Result<()> {
        self.with_file(|file, failures| {
            if failures.copy_parameters {
                return Err(failure("parameter copy"));
            }
            let stream = file
                .streams
                .get_mut(index)
                .ok_or_else(|| failure("parameter copy"))?;
            stream.parameters = Some(parameters.clone().with_codec_tag(0));
            Ok(())
        })
    }

    fn time_base(&self, index: usize) -> Rational {
        self.with_file(|file, _| {
            file.streams
                .get(index)
                .map(|s| s.time_base)
                .unwrap_or(Rational::new(1, 1000))
        })
    }

    fn set_time_base(&mut self, index: usize, time_base: Rational) {
        self.with_file(|file, _| {
            if let Some(stream) = file.streams.get_mut(index) {
                stream.time_base = time_base;
            }
        });
    }

    fn write_header(&mut self) -> Result<()> {
        let container_time_base = self.container_time_base();
        let needs_file = self.needs_file;
        self.with_file(|file, failures| {
            if failures.write_header {
                return Err(failure("header"));
            }
            if needs_file && !file.sink_open {
                return Err(failure("header without sink"));
            }
            if file.streams.iter().any(|s| s.parameters.is_none()) {
                return Err(failure("header with unconfigured stream"));
            }
            if let Some(time_base) = container_time_base {
                for stream in &mut file.streams {
                    stream.time_base = time_base;
                }
            }
            file.header_written = true;
            Ok(())
        })
    }

    fn write_interleaved(&mut self, packet: &mut MemoryPacket) -> Result<()> {
        self.with_file(|file, failures| {
            if failures.write_packet || !file.header_written {
                return Err(failure("packet write"));
            }
            let last = file.packets_for(packet.stream).last().and_then(|p| p.dts);
            if let (Some(last), Some(dts)) = (last, packet.dts) {
                if dts <= last {
                    return Err(failure("non monotonic dts"));
                }
            }
            file.packets.push(packet.clone());
            Ok(())
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.with_file(|file, failures| {
            file.flushes += 1;
            if failures.flush {
                return Err(failure("flush"));
            }
            Ok(())
        })
    }

    fn write_trailer(&mut self) -> Result<()> {
        self.with_file(|file, failures| {
            if failures.write_trailer {
                return Err(failure("trailer"));
            }
            file.trailer_written = true;
            Ok(())
        })
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        self.with_file(|file, _| file.freed = true);
    }
}

pub struct MemoryEncoder {
    state: Arc<Mutex<LibraryState>>,
    settings: EncoderSettings,
    parameters: MemoryParameters,
    queue: VecDeque<MemoryPacket>,
    delay: usize,
    eof: bool,
}

impl FrameEncoder for MemoryEncoder {
    type Frame = MemoryFrame;
    type Packet = MemoryPacket;
    type Parameters = MemoryParameters;

    fn time_base(&self) -> Rational {
        self.settings.time_base
    }

    fn parameters(&self) -> Result<MemoryParameters> {
        Ok(self.parameters.clone())
    }

    fn send_frame(&mut self, frame: Option<&MemoryFrame>) -> Result<()> {
        let fail = self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .failures
            .encode;
        if fail || self.eof {
            return Err(WriterError::Encoding("send frame".to_string()));
        }
        match frame {
            Some(frame) => {
                let pts = frame.pts.unwrap_or(0);
                let mut packet = MemoryPacket::new(0, pts, pts).with_duration(1);
                packet.data = frame.data.clone();
                self.queue.push_back(packet);
            }
            None => self.eof = true,
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> Result<Option<MemoryPacket>> {
        if self.eof || self.queue.len() > self.delay {
            Ok(self.queue.pop_front())
        } else {
            Ok(None)
        }
    }
}
