use stream_bridge::engine::Drain;

use crate::frame::DecodedVideo;
use crate::hw::find_hw_decoder;
use crate::packet::AvPacket;
use crate::stream::AvStream;

/// Video decoder for one source stream. Packets go in unchanged, so decoded
/// pictures carry timestamps in the stream time base.
pub struct Decoder {
    stream_index: usize,
    inner: ffmpeg_next::codec::decoder::Video,
}

unsafe impl Send for Decoder {}

impl Decoder {
    pub fn new(stream: &AvStream, prefer_hardware: bool) -> anyhow::Result<Self> {
        if !stream.is_video() {
            return Err(anyhow::anyhow!("stream #{} is not video", stream.index()));
        }

        if prefer_hardware {
            if let Some(hw_codec) = find_hw_decoder(stream.parameters().id()) {
                let hw_name = hw_codec.name().to_string();
                match Self::open(stream, Some(hw_codec)) {
                    Ok(decoder) => {
                        log::info!("decoder opened: {} (hardware)", hw_name);
                        return Ok(decoder);
                    }
                    Err(e) => log::warn!(
                        "hardware decoder {} failed: {:#}, falling back to software",
                        hw_name,
                        e
                    ),
                }
            }
        }

        let decoder = Self::open(stream, None)?;
        log::info!("decoder opened: {}", stream.codec_name());
        Ok(decoder)
    }

    fn open(stream: &AvStream, codec: Option<ffmpeg_next::Codec>) -> anyhow::Result<Self> {
        let mut decoder_ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*decoder_ctx.as_mut_ptr()).time_base = stream.time_base().into();
        }
        decoder_ctx.set_parameters(stream.parameters().clone())?;

        let video_decoder = match codec {
            Some(codec) => decoder_ctx.decoder().open_as(codec)?.video()?,
            None => decoder_ctx.decoder().video()?,
        };
        if video_decoder.format() == ffmpeg_next::format::Pixel::None
            || video_decoder.width() == 0
            || video_decoder.height() == 0
        {
            return Err(anyhow::anyhow!("missing codec parameters"));
        }

        Ok(Self {
            stream_index: stream.index(),
            inner: video_decoder,
        })
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    pub fn format(&self) -> ffmpeg_next::format::Pixel {
        self.inner.format()
    }
}

impl stream_bridge::engine::VideoDecoder for Decoder {
    type Packet = AvPacket;
    type Picture = DecodedVideo;

    fn send_packet(&mut self, packet: &AvPacket) -> anyhow::Result<()> {
        self.inner.send_packet(packet.get())?;
        Ok(())
    }

    fn receive_frame(&mut self) -> anyhow::Result<Drain<DecodedVideo>> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.inner.receive_frame(&mut frame) {
            Ok(()) => Ok(Drain::Ready(DecodedVideo::from(frame))),
            Err(ffmpeg_next::Error::Eof) => Ok(Drain::EndOfStream),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(Drain::NeedsInput)
            }
            Err(err) => Err(err.into()),
        }
    }
}
