//! Hardware codec discovery.
//!
//! Looks up CUDA/VAAPI/QSV/V4L2M2M variants of a codec. Callers fall back to
//! the software codec when none is available or opening one fails.

use ffmpeg_next::codec::Id;
use ffmpeg_next::format::Pixel;

/// Hardware decoder names for `codec_id`, most preferred first.
pub fn hw_decoder_names(codec_id: Id) -> &'static [&'static str] {
    match codec_id {
        Id::H264 => &["h264_cuvid", "h264_qsv", "h264_v4l2m2m"],
        Id::HEVC => &["hevc_cuvid", "hevc_qsv", "hevc_v4l2m2m"],
        Id::VP8 => &["vp8_cuvid", "vp8_qsv", "vp8_v4l2m2m"],
        Id::VP9 => &["vp9_cuvid", "vp9_qsv", "vp9_v4l2m2m"],
        Id::AV1 => &["av1_cuvid", "av1_qsv"],
        Id::MPEG2VIDEO => &["mpeg2_cuvid", "mpeg2_qsv", "mpeg2_v4l2m2m"],
        Id::MPEG4 => &["mpeg4_cuvid", "mpeg4_v4l2m2m"],
        _ => &[],
    }
}

/// Hardware encoder names for a software codec name, most preferred first.
pub fn hw_encoder_names(codec_name: &str) -> &'static [&'static str] {
    match codec_name {
        "libx264" | "h264" => &["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_v4l2m2m"],
        "libx265" | "hevc" | "h265" => &["hevc_nvenc", "hevc_vaapi", "hevc_qsv", "hevc_v4l2m2m"],
        "libvpx-vp9" | "vp9" => &["vp9_vaapi", "vp9_qsv"],
        "libaom-av1" | "libsvtav1" | "av1" => &["av1_nvenc", "av1_vaapi", "av1_qsv"],
        _ => &[],
    }
}

pub fn find_hw_decoder(codec_id: Id) -> Option<ffmpeg_next::Codec> {
    for name in hw_decoder_names(codec_id) {
        if let Some(codec) = ffmpeg_next::decoder::find_by_name(name) {
            log::info!("found hardware decoder: {}", name);
            return Some(codec);
        }
    }
    None
}

pub fn find_hw_encoder(codec_name: &str) -> Option<ffmpeg_next::Codec> {
    for name in hw_encoder_names(codec_name) {
        if let Some(codec) = ffmpeg_next::encoder::find_by_name(name) {
            log::info!("found hardware encoder: {}", name);
            return Some(codec);
        }
    }
    None
}

pub fn is_hw_codec(name: &str) -> bool {
    ["nvenc", "vaapi", "qsv", "v4l2m2m", "cuvid"]
        .iter()
        .any(|suffix| name.contains(suffix))
}

/// Picture format to open `codec_name` with when YUV420P was requested.
/// Hardware encoders commonly want NV12.
pub fn pixel_format_for_encoder(requested: Pixel, codec_name: &str) -> Pixel {
    if requested == Pixel::YUV420P && is_hw_codec(codec_name) {
        Pixel::NV12
    } else {
        requested
    }
}
