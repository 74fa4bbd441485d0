use bytes::Bytes;
use stream_bridge::Rational;
use stream_bridge::engine::{EncodedPacket, SourcePacket};

use crate::stream::from_av_rational;

/// Demuxed packet as read from a source.
pub struct AvPacket(ffmpeg_next::Packet);

impl AvPacket {
    pub fn get(&self) -> &ffmpeg_next::Packet {
        &self.0
    }
}

impl From<ffmpeg_next::Packet> for AvPacket {
    fn from(packet: ffmpeg_next::Packet) -> Self {
        Self(packet)
    }
}

impl SourcePacket for AvPacket {
    fn stream_index(&self) -> usize {
        self.0.stream()
    }
}

/// Copies an encoder packet out of FFmpeg. `fallback_duration` replaces a
/// missing duration, in `time_base` units.
pub fn to_encoded(
    packet: &ffmpeg_next::Packet,
    time_base: ffmpeg_next::Rational,
    fallback_duration: i64,
) -> EncodedPacket {
    let duration = match packet.duration() {
        d if d > 0 => d,
        _ => fallback_duration,
    };
    EncodedPacket {
        data: packet.data().map(Bytes::copy_from_slice).unwrap_or_default(),
        pts: packet.pts(),
        dts: packet.dts(),
        duration,
        is_key: packet.is_key(),
        time_base: from_av_rational(time_base),
    }
}

/// Builds an FFmpeg packet for stream `stream_index` of an output.
pub fn from_encoded(packet: &EncodedPacket, stream_index: usize) -> ffmpeg_next::Packet {
    let mut p = ffmpeg_next::Packet::copy(&packet.data);
    p.set_pts(packet.pts);
    p.set_dts(packet.dts);
    p.set_duration(packet.duration);
    if packet.is_key {
        p.set_flags(ffmpeg_next::packet::Flags::KEY);
    }
    p.set_stream(stream_index);
    p.set_position(-1);
    p
}
