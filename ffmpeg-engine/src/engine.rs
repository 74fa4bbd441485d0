use stream_bridge::PixelLayout;
use stream_bridge::engine::{CodecEngine, EncoderSettings, ReaderOptions, StreamInfo};

use crate::decoder::Decoder;
use crate::encoder::VideoEncoder;
use crate::frame::DecodedVideo;
use crate::input::AvInput;
use crate::output::AvOutput;
use crate::scaler::{FrameConverter, PictureConverter};

/// Codec engine backed by libavformat/libavcodec/libswscale.
#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegEngine;

impl FfmpegEngine {
    pub fn new() -> Self {
        Self
    }
}

impl CodecEngine for FfmpegEngine {
    type Encoder = VideoEncoder;
    type Writer = AvOutput;
    type FrameConverter = FrameConverter;
    type Reader = AvInput;
    type Decoder = Decoder;
    type Picture = DecodedVideo;
    type PictureConverter = PictureConverter;

    fn ensure_ready(&self) -> anyhow::Result<()> {
        crate::init()
    }

    fn negotiate_encoder(&self, settings: &EncoderSettings) -> anyhow::Result<VideoEncoder> {
        VideoEncoder::open(settings)
    }

    fn open_writer(
        &self,
        address: &str,
        format: &str,
        encoder: &VideoEncoder,
    ) -> anyhow::Result<AvOutput> {
        AvOutput::open(address, format, encoder)
    }

    fn frame_converter(
        &self,
        src: PixelLayout,
        encoder: &VideoEncoder,
    ) -> anyhow::Result<FrameConverter> {
        FrameConverter::new(src, (encoder.format(), encoder.width(), encoder.height()))
    }

    fn open_reader(&self, address: &str, options: &ReaderOptions) -> anyhow::Result<AvInput> {
        AvInput::open(address, options)
    }

    fn negotiate_decoder(
        &self,
        reader: &AvInput,
        stream: &StreamInfo,
        prefer_hardware: bool,
    ) -> anyhow::Result<Decoder> {
        let av_stream = reader
            .stream(stream.index)
            .ok_or_else(|| anyhow::anyhow!("stream #{} not found", stream.index))?;
        Decoder::new(av_stream, prefer_hardware)
    }

    fn picture_converter(
        &self,
        _decoder: &Decoder,
        dst: PixelLayout,
    ) -> anyhow::Result<PictureConverter> {
        PictureConverter::new(dst)
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
