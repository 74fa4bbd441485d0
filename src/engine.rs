//! Codec engine capability interface.
//!
//! The pipelines only ever talk to the engine through these traits. Every
//! handle an engine hands out is owned by exactly one pipeline and moved to
//! its worker thread on `start()`, so handles must be `Send` but never need
//! to be `Sync`. Dropping a handle releases the engine resources behind it.

use std::time::Duration;

use bytes::Bytes;

use crate::media::types::{PixelLayout, Region};
use crate::timebase::Rational;

/// Result of pulling from an encoder or decoder after feeding it.
#[derive(Debug)]
pub enum Drain<T> {
    Ready(T),
    /// Feed more input before anything else comes out.
    NeedsInput,
    /// The engine has been flushed and will never emit again.
    EndOfStream,
}

/// Result of reading one packet from a live source.
#[derive(Debug)]
pub enum ReadOutcome<P> {
    Packet(P),
    EndOfStream,
    /// No data yet; retry after a short pause.
    Again,
    /// Unexpected read failure. The source may or may not recover.
    Failed(anyhow::Error),
}

/// Encoded packet on its way from the encoder to the container writer.
#[derive(Clone, Debug)]
pub struct EncodedPacket {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub duration: i64,
    pub is_key: bool,
    /// Time base `pts`, `dts` and `duration` are expressed in.
    pub time_base: Rational,
}

impl EncodedPacket {
    /// Re-expresses all timestamps in `to`, preserving real elapsed time.
    pub fn rescale(&mut self, to: Rational) {
        let from = self.time_base;
        if from == to {
            return;
        }
        self.pts = self.pts.map(|v| Rational::rescale(v, from, to));
        self.dts = self.dts.map(|v| Rational::rescale(v, from, to));
        self.duration = Rational::rescale(self.duration, from, to);
        self.time_base = to;
    }
}

/// Encoder parameters negotiated on publisher initialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderSettings {
    pub codec: String,
    /// Container the packets end up in; some need codec headers out of band.
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub bitrate: u64,
    pub gop: u32,
    pub quality: u32,
    /// Requested picture layout. Hardware encoders may pick their own.
    pub layout: PixelLayout,
    pub prefer_hardware: bool,
}

/// Options applied when opening a live source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Prefer a reliable transport (TCP) for the protocol handshake and media.
    pub reliable_transport: bool,
    pub connect_timeout: Duration,
    pub max_delay: Duration,
    pub prefer_hardware: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Other,
}

/// Stream metadata probed from a source.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub time_base: Rational,
    pub frame_rate: Rational,
}

impl StreamInfo {
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }
}

pub trait VideoEncoder: Send {
    /// Engine-native planar picture accepted by [`VideoEncoder::send_picture`].
    type Picture: Send;

    /// Time base of `pts` values fed in and of packets drained out.
    fn time_base(&self) -> Rational;

    /// Offers the region hints for the next picture. Engines are free to
    /// ignore them; none is required to translate them into rate control.
    fn hint_regions(&mut self, _regions: &[Region]) {}

    fn send_picture(&mut self, picture: Self::Picture, pts: i64) -> anyhow::Result<()>;

    /// Signals end of input so buffered packets can be drained.
    fn send_eof(&mut self) -> anyhow::Result<()>;

    fn receive_packet(&mut self) -> anyhow::Result<Drain<EncodedPacket>>;
}

pub trait VideoDecoder: Send {
    type Packet;
    type Picture;

    fn send_packet(&mut self, packet: &Self::Packet) -> anyhow::Result<()>;

    fn receive_frame(&mut self) -> anyhow::Result<Drain<Self::Picture>>;
}

/// A decoded picture as handed out by the engine's decoder.
pub trait DecodedPicture {
    /// Presentation timestamp in stream time base, None when unknown.
    fn pts(&self) -> Option<i64>;
}

/// A demuxed packet as handed out by the engine's container reader.
pub trait SourcePacket: Send {
    fn stream_index(&self) -> usize;
}

pub trait ContainerWriter: Send {
    /// Time base of the written video stream, known once the writer is open.
    fn stream_time_base(&self) -> Rational;

    fn write_header(&mut self) -> anyhow::Result<()>;

    /// Writes a packet already rescaled to [`ContainerWriter::stream_time_base`].
    fn write_packet(&mut self, packet: EncodedPacket) -> anyhow::Result<()>;

    fn write_trailer(&mut self) -> anyhow::Result<()>;

    /// Closes the underlying connection. Further writes fail.
    fn close(&mut self) -> anyhow::Result<()>;
}

pub trait ContainerReader: Send {
    type Packet: SourcePacket;

    fn streams(&self) -> &[StreamInfo];

    fn read_packet(&mut self) -> ReadOutcome<Self::Packet>;
}

/// Pixel layout conversion. Never resizes unless the engine created it to.
pub trait PixelConverter: Send {
    type Input: ?Sized;
    type Output;

    fn convert(&mut self, input: &Self::Input) -> anyhow::Result<Self::Output>;
}

/// Entry point of a codec engine.
pub trait CodecEngine: Send + Sync + 'static {
    type Encoder: VideoEncoder + 'static;
    type Writer: ContainerWriter + 'static;
    /// Converts producer frames into encoder pictures.
    type FrameConverter: PixelConverter<
            Input = crate::media::types::Frame,
            Output = <Self::Encoder as VideoEncoder>::Picture,
        > + 'static;

    type Reader: ContainerReader + 'static;
    type Decoder: VideoDecoder<
            Packet = <Self::Reader as ContainerReader>::Packet,
            Picture = Self::Picture,
        > + 'static;
    type Picture: DecodedPicture;
    /// Converts decoded pictures into tightly packed output buffers.
    type PictureConverter: PixelConverter<Input = Self::Picture, Output = Bytes> + 'static;

    /// One-time process-wide setup. Idempotent and safe to call from any thread.
    fn ensure_ready(&self) -> anyhow::Result<()>;

    fn negotiate_encoder(&self, settings: &EncoderSettings) -> anyhow::Result<Self::Encoder>;

    /// Opens a container writer with one video stream matching `encoder`.
    fn open_writer(
        &self,
        address: &str,
        format: &str,
        encoder: &Self::Encoder,
    ) -> anyhow::Result<Self::Writer>;

    /// Converter from producer frames in `src` into pictures `encoder` accepts.
    fn frame_converter(
        &self,
        src: PixelLayout,
        encoder: &Self::Encoder,
    ) -> anyhow::Result<Self::FrameConverter>;

    fn open_reader(&self, address: &str, options: &ReaderOptions)
    -> anyhow::Result<Self::Reader>;

    fn negotiate_decoder(
        &self,
        reader: &Self::Reader,
        stream: &StreamInfo,
        prefer_hardware: bool,
    ) -> anyhow::Result<Self::Decoder>;

    /// Converter from the decoder's native output into `dst`, resizing if needed.
    fn picture_converter(
        &self,
        decoder: &Self::Decoder,
        dst: PixelLayout,
    ) -> anyhow::Result<Self::PictureConverter>;
}
