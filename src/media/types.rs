use std::fmt::{Display, Formatter};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::timebase::Rational;

/// Pixel layouts exchanged with the codec engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray8,
    #[default]
    Rgb24,
    Bgr24,
    Rgba,
    Bgra,
    Yuv420p,
}

impl PixelFormat {
    /// Packed layout a producer frame with `channels` interleaved channels uses.
    /// Three channels are BGR, the order capture pipelines hand out.
    pub fn from_channels(channels: u32) -> Option<Self> {
        match channels {
            1 => Some(PixelFormat::Gray8),
            3 => Some(PixelFormat::Bgr24),
            4 => Some(PixelFormat::Bgra),
            _ => None,
        }
    }

    /// Bytes per pixel for packed formats, None for planar ones.
    pub fn bytes_per_pixel(&self) -> Option<u32> {
        match self {
            PixelFormat::Gray8 => Some(1),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba | PixelFormat::Bgra => Some(4),
            PixelFormat::Yuv420p => None,
        }
    }
}

/// Pixel format plus geometry of a picture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelLayout {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl PixelLayout {
    pub fn new(format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
        }
    }

    /// Size of a tightly packed buffer in this layout.
    pub fn packed_len(&self) -> Option<usize> {
        let bpp = self.format.bytes_per_pixel()?;
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(bpp as usize)
    }
}

/// Rectangle with a target quality; lower quality values request higher fidelity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub quality: i32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32, quality: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            quality,
        }
    }
}

impl Display for Region {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "({},{},{}x{}) quality={}",
            self.x, self.y, self.width, self.height, self.quality
        )
    }
}

/// Raw producer frame: tightly packed interleaved pixels plus region hints.
///
/// `data.len() == width * height * channels` always holds; construction
/// rejects anything else.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Bytes,
    width: u32,
    height: u32,
    channels: u32,
    timestamp: i64,
    regions: Vec<Region>,
}

impl Frame {
    pub fn new(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        channels: u32,
        timestamp: i64,
    ) -> BridgeResult<Self> {
        let data = data.into();
        if width == 0 || height == 0 {
            return Err(BridgeError::config(format!(
                "invalid frame size {}x{}",
                width, height
            )));
        }
        if PixelFormat::from_channels(channels).is_none() {
            return Err(BridgeError::config(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        let expected = Self::expected_len(width, height, channels)
            .ok_or_else(|| BridgeError::config("frame size overflows"))?;
        if data.len() != expected {
            return Err(BridgeError::config(format!(
                "frame buffer is {} bytes, expected {} ({}x{}x{})",
                data.len(),
                expected,
                width,
                height,
                channels
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
            timestamp,
            regions: Vec::new(),
        })
    }

    /// Copies `data` into a new frame.
    pub fn from_slice(
        data: &[u8],
        width: u32,
        height: u32,
        channels: u32,
        timestamp: i64,
    ) -> BridgeResult<Self> {
        Self::new(Bytes::copy_from_slice(data), width, height, channels, timestamp)
    }

    pub fn expected_len(width: u32, height: u32, channels: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(channels as usize)
    }

    pub fn with_regions(mut self, regions: impl IntoIterator<Item = Region>) -> Self {
        self.regions.extend(regions);
        self
    }

    pub fn add_region(&mut self, region: Region) {
        self.regions.push(region);
    }

    pub fn clear_regions(&mut self) {
        self.regions.clear();
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn layout(&self) -> PixelLayout {
        // channel count is validated at construction
        let format = PixelFormat::from_channels(self.channels).unwrap_or(PixelFormat::Bgr24);
        PixelLayout::new(format, self.width, self.height)
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "Frame {{ {}x{}x{}, ts: {}, regions: {} }}",
            self.width,
            self.height,
            self.channels,
            self.timestamp,
            self.regions.len()
        )
    }
}

/// Decoded, converted frame delivered to a [`crate::FrameSink`].
#[derive(Clone, Debug, Default)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
}

impl Display for VideoFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "VideoFrame data_len: {}, width: {}, height: {}, timestamp_ms: {}",
            self.data.len(),
            self.width,
            self.height,
            self.timestamp_ms
        )
    }
}

fn default_channels() -> u32 {
    3
}
fn default_fps() -> u32 {
    30
}
fn default_bitrate() -> u64 {
    1_000_000
}
fn default_gop() -> u32 {
    30
}
fn default_quality() -> u32 {
    23
}
fn default_format() -> String {
    "flv".to_string()
}
fn default_codec() -> String {
    "libx264".to_string()
}

/// Publish target. Captured at construction and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoint {
    // e.g. rtmp://host/live/stream
    pub address: String,
    pub width: u32,
    pub height: u32,
    // channels of the frames the producer pushes
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    // bps
    #[serde(default = "default_bitrate")]
    pub bitrate: u64,
    // keyframe interval in frames
    #[serde(default = "default_gop")]
    pub gop: u32,
    // base quality (crf), lower is better
    #[serde(default = "default_quality")]
    pub quality: u32,
    // container format, "flv" for rtmp
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default)]
    pub prefer_hardware: bool,
}

impl StreamEndpoint {
    pub fn builder(address: impl Into<String>) -> StreamEndpointBuilder {
        StreamEndpointBuilder::new(address)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.address.trim().is_empty() {
            return Err(BridgeError::config("target address is empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(BridgeError::config(format!(
                "invalid geometry {}x{}",
                self.width, self.height
            )));
        }
        // 4:2:0 chroma subsampling needs even dimensions
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(BridgeError::config(format!(
                "geometry {}x{} must be even",
                self.width, self.height
            )));
        }
        if PixelFormat::from_channels(self.channels).is_none() {
            return Err(BridgeError::config(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        if self.fps == 0 || self.fps > i32::MAX as u32 {
            return Err(BridgeError::config(format!("invalid frame rate {}", self.fps)));
        }
        if self.gop == 0 {
            return Err(BridgeError::config("keyframe interval must be positive"));
        }
        if self.bitrate == 0 {
            return Err(BridgeError::config("bitrate must be positive"));
        }
        if self.quality > 51 {
            return Err(BridgeError::config(format!(
                "quality {} out of range 0..=51",
                self.quality
            )));
        }
        Ok(())
    }

    pub fn frame_rate(&self) -> Rational {
        Rational::new(self.fps as i32, 1)
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_rate().frame_interval()
    }

    /// Layout of the frames the producer is expected to push.
    pub fn source_layout(&self) -> PixelLayout {
        let format = PixelFormat::from_channels(self.channels).unwrap_or(PixelFormat::Bgr24);
        PixelLayout::new(format, self.width, self.height)
    }

    pub fn encoder_layout(&self) -> PixelLayout {
        PixelLayout::new(PixelFormat::Yuv420p, self.width, self.height)
    }
}

pub struct StreamEndpointBuilder {
    endpoint: StreamEndpoint,
}

impl StreamEndpointBuilder {
    fn new(address: impl Into<String>) -> Self {
        Self {
            endpoint: StreamEndpoint {
                address: address.into(),
                width: 0,
                height: 0,
                channels: default_channels(),
                fps: default_fps(),
                bitrate: default_bitrate(),
                gop: default_gop(),
                quality: default_quality(),
                format: default_format(),
                codec: default_codec(),
                prefer_hardware: false,
            },
        }
    }

    pub fn geometry(mut self, width: u32, height: u32) -> Self {
        self.endpoint.width = width;
        self.endpoint.height = height;
        self
    }

    pub fn channels(mut self, channels: u32) -> Self {
        self.endpoint.channels = channels;
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.endpoint.fps = fps;
        self
    }

    pub fn bitrate(mut self, bitrate: u64) -> Self {
        self.endpoint.bitrate = bitrate;
        self
    }

    pub fn gop(mut self, gop: u32) -> Self {
        self.endpoint.gop = gop;
        self
    }

    pub fn quality(mut self, quality: u32) -> Self {
        self.endpoint.quality = quality;
        self
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.endpoint.format = format.into();
        self
    }

    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.endpoint.codec = codec.into();
        self
    }

    pub fn prefer_hardware(mut self, prefer: bool) -> Self {
        self.endpoint.prefer_hardware = prefer;
        self
    }

    pub fn build(self) -> BridgeResult<StreamEndpoint> {
        self.endpoint.validate()?;
        Ok(self.endpoint)
    }
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    500
}
fn default_transient_backoff_ms() -> u64 {
    10
}
fn default_error_backoff_ms() -> u64 {
    100
}
fn default_idle_sleep_ms() -> u64 {
    1
}

/// Receive source. Output geometry falls back to the source geometry when unset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverConfig {
    // e.g. rtsp://camera/stream
    pub address: String,
    #[serde(default)]
    pub output_width: Option<u32>,
    #[serde(default)]
    pub output_height: Option<u32>,
    #[serde(default)]
    pub pixel_format: PixelFormat,
    #[serde(default)]
    pub prefer_hardware: bool,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_transient_backoff_ms")]
    pub transient_backoff_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    // None = retry reads forever until stop()
    #[serde(default)]
    pub max_consecutive_read_errors: Option<u32>,
}

impl ReceiverConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            output_width: None,
            output_height: None,
            pixel_format: PixelFormat::Rgb24,
            prefer_hardware: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            max_delay_ms: default_max_delay_ms(),
            transient_backoff_ms: default_transient_backoff_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            idle_sleep_ms: default_idle_sleep_ms(),
            max_consecutive_read_errors: None,
        }
    }

    pub fn with_output_size(mut self, width: u32, height: u32) -> Self {
        self.output_width = Some(width).filter(|w| *w > 0);
        self.output_height = Some(height).filter(|h| *h > 0);
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    pub fn with_max_consecutive_read_errors(mut self, limit: u32) -> Self {
        self.max_consecutive_read_errors = Some(limit);
        self
    }

    pub fn with_backoff(mut self, transient: Duration, error: Duration) -> Self {
        self.transient_backoff_ms = transient.as_millis() as u64;
        self.error_backoff_ms = error.as_millis() as u64;
        self
    }

    pub fn prefer_hardware(mut self, prefer: bool) -> Self {
        self.prefer_hardware = prefer;
        self
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.address.trim().is_empty() {
            return Err(BridgeError::config("source address is empty"));
        }
        if self.pixel_format.bytes_per_pixel().is_none() {
            return Err(BridgeError::config(format!(
                "output format {:?} is not a packed format",
                self.pixel_format
            )));
        }
        Ok(())
    }

    /// Output size: the override when set, otherwise the source size.
    pub fn output_geometry(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        (
            self.output_width.filter(|w| *w > 0).unwrap_or(source_width),
            self.output_height.filter(|h| *h > 0).unwrap_or(source_height),
        )
    }

    pub fn transient_backoff(&self) -> Duration {
        Duration::from_millis(self.transient_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
