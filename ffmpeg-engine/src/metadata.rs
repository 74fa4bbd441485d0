//! Source metadata, similar to ffprobe.

use std::fmt;
use std::time::Duration;

use stream_bridge::engine::{MediaKind, ReaderOptions};

use crate::input::AvInput;
use crate::stream::AvStream;

/// Format-level info.
#[derive(Debug, Clone)]
pub struct FormatInfo {
    /// Format name, e.g. "flv" or "rtsp".
    pub format_name: String,
    /// Duration in seconds; None for live sources.
    pub duration_sec: Option<f64>,
    /// Total bitrate in bps; 0 if unknown.
    pub bit_rate: i64,
    pub nb_streams: u32,
}

/// Per-stream info.
#[derive(Debug, Clone)]
pub struct StreamDetails {
    pub index: usize,
    /// "video", "audio" or "other".
    pub codec_type: String,
    pub codec_name: String,
    /// e.g. "1/90000"
    pub time_base: String,
    pub duration_ts: Option<i64>,
    /// Average frame rate, e.g. "25/1".
    pub rate: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<StreamDetails>,
}

impl MediaInfo {
    /// First video stream, the one a receiver would decode.
    pub fn video(&self) -> Option<&StreamDetails> {
        self.streams.iter().find(|s| s.codec_type == "video")
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "format_name={}", self.format.format_name)?;
        match self.format.duration_sec {
            Some(d) => writeln!(f, "duration_sec={:.3}", d)?,
            None => writeln!(f, "duration_sec=N/A")?,
        }
        writeln!(f, "bit_rate={}", self.format.bit_rate)?;
        writeln!(f, "nb_streams={}", self.format.nb_streams)?;
        writeln!(f, "[/FORMAT]")?;
        for s in &self.streams {
            writeln!(f, "[STREAM]")?;
            writeln!(f, "index={}", s.index)?;
            writeln!(f, "codec_type={}", s.codec_type)?;
            writeln!(f, "codec_name={}", s.codec_name)?;
            writeln!(f, "time_base={}", s.time_base)?;
            if let Some(d) = s.duration_ts {
                writeln!(f, "duration_ts={}", d)?;
            }
            writeln!(f, "rate={}", s.rate)?;
            if let Some(w) = s.width {
                writeln!(f, "width={}", w)?;
            }
            if let Some(h) = s.height {
                writeln!(f, "height={}", h)?;
            }
            if let Some(sr) = s.sample_rate {
                writeln!(f, "sample_rate={}", sr)?;
            }
            if let Some(c) = s.channels {
                writeln!(f, "channels={}", c)?;
            }
            writeln!(f, "[/STREAM]")?;
        }
        Ok(())
    }
}

fn details(stream: &AvStream) -> StreamDetails {
    let kind = stream.kind();
    let time_base = stream.time_base();
    let rate = stream.rate();
    let (width, height, sample_rate, channels) = match kind {
        MediaKind::Video => (Some(stream.width()), Some(stream.height()), None, None),
        MediaKind::Audio => (None, None, Some(stream.sample_rate()), Some(stream.channels())),
        MediaKind::Other => (None, None, None, None),
    };
    StreamDetails {
        index: stream.index(),
        codec_type: format!("{:?}", kind).to_lowercase(),
        codec_name: stream.codec_name(),
        time_base: format!("{}/{}", time_base.numerator(), time_base.denominator()),
        duration_ts: stream.duration(),
        rate: format!("{}/{}", rate.numerator(), rate.denominator()),
        width,
        height,
        sample_rate,
        channels,
    }
}

/// Opens `address` the way a receiver would and reports what it carries.
///
/// ```ignore
/// let info = ffmpeg_engine::probe("rtsp://camera/stream", Duration::from_secs(2))?;
/// println!("{}", info);
/// ```
pub fn probe(address: &str, connect_timeout: Duration) -> anyhow::Result<MediaInfo> {
    crate::init()?;
    let options = ReaderOptions {
        reliable_transport: true,
        connect_timeout,
        max_delay: Duration::from_millis(500),
        prefer_hardware: false,
    };
    let input = AvInput::open(address, &options)?;

    let streams: Vec<StreamDetails> = input.av_streams().iter().map(details).collect();
    Ok(MediaInfo {
        format: FormatInfo {
            format_name: input.format_name(),
            duration_sec: input.duration().map(|d| d as f64 / 1_000_000.0),
            bit_rate: input.bit_rate(),
            nb_streams: streams.len() as u32,
        },
        streams,
    })
}
