use std::ffi::CString;

use ffmpeg_next::Dictionary;
use ffmpeg_next::format::Pixel;
use stream_bridge::Rational;
use stream_bridge::engine::{Drain, EncodedPacket, EncoderSettings};

use crate::frame::to_av_pixel;
use crate::hw::{find_hw_encoder, is_hw_codec, pixel_format_for_encoder};
use crate::packet::to_encoded;
use crate::stream::{from_av_rational, to_av_rational};

/// Low-latency options for software H.264/H.265 encoders.
pub fn encoder_options(codec_name: &str, quality: u32) -> Dictionary<'static> {
    let mut opts = Dictionary::new();
    if matches!(codec_name, "libx264" | "libx265") {
        opts.set("preset", "ultrafast");
        opts.set("tune", "zerolatency");
        opts.set("crf", &quality.to_string());
    }
    opts
}

/// Whether muxer `format` wants codec extradata out of band (flv, mp4, rtsp).
pub fn needs_global_header(format: &str) -> bool {
    let Ok(name) = CString::new(format) else {
        return false;
    };
    let muxer = unsafe {
        ffmpeg_next::ffi::av_guess_format(name.as_ptr(), std::ptr::null(), std::ptr::null())
    };
    if muxer.is_null() {
        return false;
    }
    unsafe { ((*muxer).flags & ffmpeg_next::ffi::AVFMT_GLOBALHEADER as i32) != 0 }
}

/// Opened video encoder. Pictures go in with a frame-sequence pts, packets
/// come out in the encoder time base (1/fps).
pub struct VideoEncoder {
    inner: ffmpeg_next::codec::encoder::Video,
    codec_name: String,
    time_base: ffmpeg_next::Rational,
    frame_duration: i64,
}

unsafe impl Send for VideoEncoder {}

impl VideoEncoder {
    /// Opens the hardware variant of `settings.codec` when preferred and
    /// available, otherwise (or when that fails) the software codec.
    pub fn open(settings: &EncoderSettings) -> anyhow::Result<Self> {
        if settings.prefer_hardware {
            if let Some(hw_codec) = find_hw_encoder(&settings.codec) {
                let hw_name = hw_codec.name().to_string();
                log::info!("attempting hardware encoder: {}", hw_name);
                match Self::open_codec(hw_codec, settings) {
                    Ok(encoder) => return Ok(encoder),
                    Err(e) => log::warn!(
                        "hardware encoder {} failed: {:#}, falling back to {}",
                        hw_name,
                        e,
                        settings.codec
                    ),
                }
            } else {
                log::info!("no hardware encoder for {}", settings.codec);
            }
        }

        let codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
            .ok_or_else(|| anyhow::anyhow!("codec not found: {}", settings.codec))?;
        Self::open_codec(codec, settings)
    }

    fn open_codec(codec: ffmpeg_next::Codec, settings: &EncoderSettings) -> anyhow::Result<Self> {
        let codec_name = codec.name().to_string();
        let pixel = pixel_format_for_encoder(to_av_pixel(settings.layout.format), &codec_name);

        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(pixel);
        encoder.set_frame_rate(Some(to_av_rational(settings.frame_rate)));
        encoder.set_time_base(to_av_rational(settings.frame_rate.recip()));
        encoder.set_gop(settings.gop);
        encoder.set_max_b_frames(0);
        encoder.set_bit_rate(settings.bitrate as usize);
        if needs_global_header(&settings.format) {
            encoder.set_flags(ffmpeg_next::codec::Flags::GLOBAL_HEADER);
        }

        let encoder = encoder.open_with(encoder_options(&codec_name, settings.quality))?;
        let time_base: ffmpeg_next::Rational = unsafe { (*encoder.0.as_ptr()).time_base.into() };
        let frame_duration =
            Rational::rescale(1, settings.frame_rate.recip(), from_av_rational(time_base)).max(1);

        log::info!(
            "encoder opened: {} {:?} {}x{} tb={}/{}{}",
            codec_name,
            pixel,
            settings.width,
            settings.height,
            time_base.numerator(),
            time_base.denominator(),
            if is_hw_codec(&codec_name) { " (hardware)" } else { "" }
        );
        Ok(Self {
            inner: encoder,
            codec_name,
            time_base,
            frame_duration,
        })
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn format(&self) -> Pixel {
        self.inner.format()
    }

    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    pub fn av_time_base(&self) -> ffmpeg_next::Rational {
        self.time_base
    }

    pub(crate) fn get(&self) -> &ffmpeg_next::codec::encoder::Video {
        &self.inner
    }
}

impl stream_bridge::engine::VideoEncoder for VideoEncoder {
    type Picture = ffmpeg_next::frame::Video;

    fn time_base(&self) -> Rational {
        from_av_rational(self.time_base)
    }

    fn hint_regions(&mut self, regions: &[stream_bridge::Region]) {
        if !regions.is_empty() {
            log::debug!("{}: {} region hints left to rate control", self.codec_name, regions.len());
        }
    }

    fn send_picture(&mut self, mut picture: ffmpeg_next::frame::Video, pts: i64) -> anyhow::Result<()> {
        picture.set_pts(Some(pts));
        self.inner.send_frame(&picture)?;
        Ok(())
    }

    fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()?;
        Ok(())
    }

    fn receive_packet(&mut self) -> anyhow::Result<Drain<EncodedPacket>> {
        let mut packet = ffmpeg_next::Packet::empty();
        match self.inner.receive_packet(&mut packet) {
            Ok(()) => Ok(Drain::Ready(to_encoded(
                &packet,
                self.time_base,
                self.frame_duration,
            ))),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(Drain::NeedsInput)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(Drain::EndOfStream),
            Err(err) => Err(err.into()),
        }
    }
}
