use std::time::Duration;

use ffmpeg_next::Dictionary;
use stream_bridge::engine::{ContainerReader, ReadOutcome, ReaderOptions, StreamInfo};

use crate::packet::AvPacket;
use crate::stream::AvStream;

pub fn is_rtsp(url: &str) -> bool {
    url.starts_with("rtsp://") || url.starts_with("rtsps://")
}

fn is_network(url: &str) -> bool {
    url.contains("://") && !url.starts_with("file:")
}

fn micros(d: Duration) -> String {
    d.as_micros().to_string()
}

/// Demuxer options for opening `url`. FFmpeg takes all durations in
/// microseconds.
pub fn reader_dictionary(url: &str, options: &ReaderOptions) -> Dictionary<'static> {
    let mut opts = Dictionary::new();
    if is_rtsp(url) {
        if options.reliable_transport {
            opts.set("rtsp_transport", "tcp");
        }
        opts.set("timeout", &micros(options.connect_timeout));
    } else if is_network(url) {
        opts.set("rw_timeout", &micros(options.connect_timeout));
    }
    if !options.max_delay.is_zero() {
        opts.set("max_delay", &micros(options.max_delay));
    }
    opts
}

/// Opened source container.
pub struct AvInput {
    address: String,
    inner: ffmpeg_next::format::context::Input,
    streams: Vec<AvStream>,
    infos: Vec<StreamInfo>,
}

unsafe impl Send for AvInput {}

impl AvInput {
    /// Opens `url` and probes its streams. Blocks for at most the connect
    /// timeout on network sources.
    pub fn open(url: &str, options: &ReaderOptions) -> anyhow::Result<Self> {
        let input = ffmpeg_next::format::input_with_dictionary(url, reader_dictionary(url, options))
            .map_err(|e| anyhow::anyhow!("open input {}: {}", url, e))?;

        let streams: Vec<AvStream> = input.streams().map(AvStream::from).collect();
        let infos = streams.iter().map(AvStream::info).collect();
        log::info!(
            "opened {} ({}), {} streams",
            url,
            input.format().name(),
            streams.len()
        );
        Ok(Self {
            address: url.to_string(),
            inner: input,
            streams,
            infos,
        })
    }

    pub fn stream(&self, index: usize) -> Option<&AvStream> {
        self.streams.iter().find(|s| s.index() == index)
    }

    pub fn av_streams(&self) -> &[AvStream] {
        &self.streams
    }

    pub fn format_name(&self) -> String {
        self.inner.format().name().to_string()
    }

    /// Container duration in microseconds; None for live sources.
    pub fn duration(&self) -> Option<i64> {
        match self.inner.duration() {
            d if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d <= 0 => None,
            d => Some(d),
        }
    }

    pub fn bit_rate(&self) -> i64 {
        self.inner.bit_rate()
    }
}

impl ContainerReader for AvInput {
    type Packet = AvPacket;

    fn streams(&self) -> &[StreamInfo] {
        &self.infos
    }

    fn read_packet(&mut self) -> ReadOutcome<AvPacket> {
        let mut packet = ffmpeg_next::Packet::empty();
        match packet.read(&mut self.inner) {
            Ok(()) => ReadOutcome::Packet(AvPacket::from(packet)),
            Err(ffmpeg_next::Error::Eof) => ReadOutcome::EndOfStream,
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                ReadOutcome::Again
            }
            Err(err) => ReadOutcome::Failed(
                anyhow::Error::new(err).context(format!("read {}", self.address)),
            ),
        }
    }
}
