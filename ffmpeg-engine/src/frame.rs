use anyhow::bail;
use bytes::Bytes;
use ffmpeg_next::format::Pixel;
use stream_bridge::PixelFormat;
use stream_bridge::engine::DecodedPicture;

pub fn to_av_pixel(format: PixelFormat) -> Pixel {
    match format {
        PixelFormat::Gray8 => Pixel::GRAY8,
        PixelFormat::Rgb24 => Pixel::RGB24,
        PixelFormat::Bgr24 => Pixel::BGR24,
        PixelFormat::Rgba => Pixel::RGBA,
        PixelFormat::Bgra => Pixel::BGRA,
        PixelFormat::Yuv420p => Pixel::YUV420P,
    }
}

/// Picture straight out of a decoder, in the decoder's native layout.
pub struct DecodedVideo(ffmpeg_next::frame::Video);

impl DecodedVideo {
    pub fn get(&self) -> &ffmpeg_next::frame::Video {
        &self.0
    }
}

impl From<ffmpeg_next::frame::Video> for DecodedVideo {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self(frame)
    }
}

impl DecodedPicture for DecodedVideo {
    fn pts(&self) -> Option<i64> {
        self.0.pts().or_else(|| self.0.timestamp())
    }
}

/// Copies tightly packed rows of `row_bytes` into plane 0 of `dst`,
/// honoring the plane's stride.
pub fn fill_packed(
    dst: &mut ffmpeg_next::frame::Video,
    src: &[u8],
    row_bytes: usize,
) -> anyhow::Result<()> {
    let height = dst.height() as usize;
    let stride = dst.stride(0);
    if row_bytes == 0 || stride < row_bytes {
        bail!("row of {} bytes does not fit stride {}", row_bytes, stride);
    }
    if src.len() < row_bytes * height {
        bail!(
            "buffer of {} bytes is short of {} rows of {}",
            src.len(),
            height,
            row_bytes
        );
    }
    let plane = dst.data_mut(0);
    for (row, chunk) in src.chunks_exact(row_bytes).take(height).enumerate() {
        let start = row * stride;
        plane[start..start + row_bytes].copy_from_slice(chunk);
    }
    Ok(())
}

/// Copies plane 0 of `src` into a tightly packed buffer, dropping the
/// stride padding.
pub fn pack_plane(src: &ffmpeg_next::frame::Video, row_bytes: usize) -> anyhow::Result<Bytes> {
    let height = src.height() as usize;
    let stride = src.stride(0);
    let plane = src.data(0);
    if stride < row_bytes || plane.len() < stride * height.saturating_sub(1) + row_bytes {
        bail!("plane of {} bytes is short of {} rows of {}", plane.len(), height, row_bytes);
    }
    if stride == row_bytes {
        return Ok(Bytes::copy_from_slice(&plane[..row_bytes * height]));
    }
    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        packed.extend_from_slice(&plane[start..start + row_bytes]);
    }
    Ok(Bytes::from(packed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_rows_survive_stride_padding() {
        let (w, h) = (10u32, 4u32);
        let row_bytes = w as usize * 3;
        let src: Vec<u8> = (0..row_bytes * h as usize).map(|i| (i % 251) as u8).collect();

        let mut frame = ffmpeg_next::frame::Video::new(Pixel::BGR24, w, h);
        assert!(frame.stride(0) >= row_bytes);
        fill_packed(&mut frame, &src, row_bytes).unwrap();

        let packed = pack_plane(&frame, row_bytes).unwrap();
        assert_eq!(&packed[..], &src[..]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::RGB24, 8, 8);
        assert!(fill_packed(&mut frame, &[0u8; 10], 24).is_err());
        assert!(fill_packed(&mut frame, &[0u8; 8 * 24], 0).is_err());
    }

    #[test]
    fn test_pixel_mapping() {
        assert_eq!(to_av_pixel(PixelFormat::Bgr24), Pixel::BGR24);
        assert_eq!(to_av_pixel(PixelFormat::Rgb24), Pixel::RGB24);
        assert_eq!(to_av_pixel(PixelFormat::Gray8), Pixel::GRAY8);
        assert_eq!(to_av_pixel(PixelFormat::Yuv420p), Pixel::YUV420P);
    }

    #[test]
    fn test_decoded_pts_falls_back_to_best_effort() {
        let mut frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, 4, 4);
        frame.set_pts(Some(3000));
        assert_eq!(DecodedVideo::from(frame).pts(), Some(3000));

        let frame = ffmpeg_next::frame::Video::new(Pixel::YUV420P, 4, 4);
        assert_eq!(DecodedVideo::from(frame).pts(), None);
    }
}
