use ffmpeg_next::{Packet, ffi};

use crate::{Result, WriterError, media::MediaPacket};

impl MediaPacket for Packet {
    fn stream(&self) -> usize {
        Packet::stream(self)
    }

    fn set_stream(&mut self, index: usize) {
        Packet::set_stream(self, index);
    }

    fn pts(&self) -> Option<i64> {
        Packet::pts(self)
    }

    fn set_pts(&mut self, pts: Option<i64>) {
        Packet::set_pts(self, pts);
    }

    fn dts(&self) -> Option<i64> {
        Packet::dts(self)
    }

    fn set_dts(&mut self, dts: Option<i64>) {
        Packet::set_dts(self, dts);
    }

    fn duration(&self) -> i64 {
        Packet::duration(self)
    }

    fn set_duration(&mut self, duration: i64) {
        Packet::set_duration(self, duration);
    }

    fn set_position(&mut self, position: i64) {
        Packet::set_position(self, position as isize);
    }

    /// `Packet::clone` ignores allocation failures, so reference the payload
    /// directly and report them.
    fn duplicate(&self) -> Result<Self> {
        let mut copy = Packet::empty();
        let ret = unsafe { ffi::av_packet_ref(copy.as_mut_ptr(), self.as_ptr()) };
        if ret < 0 {
            return Err(WriterError::Allocation(format!(
                "packet reference: {}",
                ffmpeg_next::Error::from(ret)
            )));
        }
        Ok(copy)
    }
}
