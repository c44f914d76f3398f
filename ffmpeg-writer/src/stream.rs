use ffmpeg_next::{codec::Parameters, ffi, format::stream};

use crate::media::{CodecParameters, MediaKind, SourceTrack};

impl CodecParameters for Parameters {
    fn kind(&self) -> MediaKind {
        self.medium().into()
    }

    fn sample_rate(&self) -> i32 {
        unsafe {
            let ptr = self.as_ptr() as *const ffi::AVCodecParameters;
            (*ptr).sample_rate
        }
    }
}

impl From<stream::Stream<'_>> for SourceTrack<Parameters> {
    fn from(stream: stream::Stream<'_>) -> Self {
        SourceTrack::new(stream.index(), stream.time_base(), stream.parameters())
    }
}
