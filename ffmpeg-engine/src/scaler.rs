use anyhow::bail;
use bytes::Bytes;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, Flags};
use stream_bridge::engine::PixelConverter;
use stream_bridge::{Frame, PixelLayout};

use crate::frame::{DecodedVideo, fill_packed, pack_plane, to_av_pixel};

pub struct Scaler {
    context: Context,
}

impl Scaler {
    pub fn new(
        src: (Pixel, u32, u32),
        dst: (Pixel, u32, u32),
    ) -> anyhow::Result<Self> {
        let context = Context::get(src.0, src.1, src.2, dst.0, dst.1, dst.2, Flags::BILINEAR)?;
        Ok(Self { context })
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        self.context.run(frame, dst).map_err(|e| e.into())
    }
}

unsafe impl Send for Scaler {}

/// Producer frames (packed, interleaved) to encoder pictures.
pub struct FrameConverter {
    src: PixelLayout,
    staging: ffmpeg_next::frame::Video,
    scaler: Scaler,
}

impl FrameConverter {
    pub fn new(src: PixelLayout, dst: (Pixel, u32, u32)) -> anyhow::Result<Self> {
        if src.packed_len().is_none() {
            bail!("producer layout {:?} is not packed", src.format);
        }
        let src_pixel = to_av_pixel(src.format);
        let scaler = Scaler::new((src_pixel, src.width, src.height), dst)?;
        Ok(Self {
            src,
            staging: ffmpeg_next::frame::Video::new(src_pixel, src.width, src.height),
            scaler,
        })
    }
}

impl PixelConverter for FrameConverter {
    type Input = Frame;
    type Output = ffmpeg_next::frame::Video;

    fn convert(&mut self, frame: &Frame) -> anyhow::Result<ffmpeg_next::frame::Video> {
        let layout = frame.layout();
        if layout != self.src {
            bail!(
                "frame {:?} {}x{} does not match {:?} {}x{}",
                layout.format,
                layout.width,
                layout.height,
                self.src.format,
                self.src.width,
                self.src.height
            );
        }
        let row_bytes = (frame.width() * frame.channels()) as usize;
        fill_packed(&mut self.staging, frame.data(), row_bytes)?;

        let mut picture = ffmpeg_next::frame::Video::empty();
        self.scaler.run(&self.staging, &mut picture)?;
        Ok(picture)
    }
}

// FrameConverter owns its staging frame exclusively.
unsafe impl Send for FrameConverter {}

/// Decoded pictures to tightly packed output buffers.
///
/// The scaler is built on the first picture and rebuilt whenever the
/// decoder's output format or size changes mid-stream.
pub struct PictureConverter {
    dst: PixelLayout,
    dst_pixel: Pixel,
    row_bytes: usize,
    scaler: Option<(Scaler, (Pixel, u32, u32))>,
}

impl PictureConverter {
    pub fn new(dst: PixelLayout) -> anyhow::Result<Self> {
        let Some(bpp) = dst.format.bytes_per_pixel() else {
            bail!("output layout {:?} is not packed", dst.format);
        };
        Ok(Self {
            dst,
            dst_pixel: to_av_pixel(dst.format),
            row_bytes: (dst.width * bpp) as usize,
            scaler: None,
        })
    }

    fn scaler_for(&mut self, src: (Pixel, u32, u32)) -> anyhow::Result<&mut Scaler> {
        let stale = self.scaler.as_ref().is_none_or(|(_, key)| *key != src);
        if stale {
            if self.scaler.is_some() {
                log::info!(
                    "decoder output changed to {:?} {}x{}, rebuilding scaler",
                    src.0,
                    src.1,
                    src.2
                );
            }
            let scaler = Scaler::new(src, (self.dst_pixel, self.dst.width, self.dst.height))?;
            self.scaler = Some((scaler, src));
        }
        match self.scaler.as_mut() {
            Some((scaler, _)) => Ok(scaler),
            None => bail!("scaler unavailable"),
        }
    }
}

impl PixelConverter for PictureConverter {
    type Input = DecodedVideo;
    type Output = Bytes;

    fn convert(&mut self, picture: &DecodedVideo) -> anyhow::Result<Bytes> {
        let frame = picture.get();
        let src = (frame.format(), frame.width(), frame.height());
        if src.0 == Pixel::None || src.1 == 0 || src.2 == 0 {
            bail!("decoded picture has no layout");
        }
        let row_bytes = self.row_bytes;
        let mut converted = ffmpeg_next::frame::Video::empty();
        self.scaler_for(src)?.run(frame, &mut converted)?;
        pack_plane(&converted, row_bytes)
    }
}
