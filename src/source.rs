use std::ffi::CString;
use std::path::Path;

use ffmpeg_next::{codec::Parameters, Dictionary, Packet};
use ffmpeg_writer::SourceTrack;

/// A demuxed camera input, read one packet at a time.
pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    streams: Vec<SourceTrack<Parameters>>,
}

impl AvInput {
    /// Resolve input format by name (e.g. "x11grab", "v4l2") via FFmpeg's av_find_input_format.
    fn find_input_format(name: &str) -> anyhow::Result<ffmpeg_next::format::format::Input> {
        let cname = CString::new(name)
            .map_err(|e| anyhow::anyhow!("invalid format name {:?}: {}", name, e))?;
        let ptr = unsafe { ffmpeg_next::ffi::av_find_input_format(cname.as_ptr()) };
        if ptr.is_null() {
            return Err(anyhow::anyhow!("input format not found: {}", name));
        }
        Ok(unsafe { ffmpeg_next::format::format::Input::wrap(ptr as *mut _) })
    }

    pub fn new(
        url: &str,
        format: Option<&str>,
        options: Option<Dictionary>,
    ) -> anyhow::Result<Self> {
        use ffmpeg_next::format::format::Format;

        let path = Path::new(url);
        let input = match format {
            Some(fmt_name) => {
                let fmt = Self::find_input_format(fmt_name)?;
                let ctx = ffmpeg_next::format::open_with(
                    path,
                    &Format::Input(fmt),
                    options.unwrap_or_default(),
                )?;
                ctx.input()
            }
            None => match options {
                Some(opts) => ffmpeg_next::format::input_with_dictionary(path, opts)?,
                None => ffmpeg_next::format::input(path)?,
            },
        };

        let streams = input.streams().map(SourceTrack::from).collect();
        Ok(Self {
            inner: input,
            streams,
        })
    }

    /// Tracks ordered by source index.
    pub fn streams(&self) -> &[SourceTrack<Parameters>] {
        &self.streams
    }

    /// `None` at end of input.
    pub fn read_packet(&mut self) -> Option<Packet> {
        self.inner.packets().next().map(|(_, packet)| packet)
    }
}
