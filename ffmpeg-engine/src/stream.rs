use ffmpeg_next::{codec::Parameters, format::stream};
use stream_bridge::Rational;
use stream_bridge::engine::{MediaKind, StreamInfo};

unsafe impl Send for AvStream {}
unsafe impl Sync for AvStream {}

pub fn from_av_rational(r: ffmpeg_next::Rational) -> Rational {
    Rational::new(r.numerator(), r.denominator())
}

pub fn to_av_rational(r: Rational) -> ffmpeg_next::Rational {
    ffmpeg_next::Rational::new(r.num, r.den)
}

/// Owned snapshot of a source stream: its codec parameters plus timing.
pub struct AvStream {
    index: usize,
    parameters: Parameters,
    time_base: ffmpeg_next::Rational,
    rate: ffmpeg_next::Rational,
    duration: Option<i64>,
}

impl AvStream {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn time_base(&self) -> ffmpeg_next::Rational {
        self.time_base
    }

    pub fn rate(&self) -> ffmpeg_next::Rational {
        self.rate
    }

    /// Duration in time base units, None when unknown (live sources).
    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    pub fn kind(&self) -> MediaKind {
        match self.parameters.medium() {
            ffmpeg_next::media::Type::Video => MediaKind::Video,
            ffmpeg_next::media::Type::Audio => MediaKind::Audio,
            _ => MediaKind::Other,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind() == MediaKind::Video
    }

    pub fn codec_name(&self) -> String {
        format!("{:?}", self.parameters.id()).to_lowercase()
    }

    // ffmpeg-next does not expose these on Parameters
    pub fn width(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).width.max(0) as u32
        }
    }

    pub fn height(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).height.max(0) as u32
        }
    }

    pub fn sample_rate(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).sample_rate.max(0) as u32
        }
    }

    pub fn channels(&self) -> u32 {
        unsafe {
            let ptr = self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters;
            (*ptr).ch_layout.nb_channels.max(0) as u32
        }
    }

    pub fn info(&self) -> StreamInfo {
        let kind = self.kind();
        let (width, height) = if kind == MediaKind::Video {
            (self.width(), self.height())
        } else {
            (0, 0)
        };
        StreamInfo {
            index: self.index,
            kind,
            codec: self.codec_name(),
            width,
            height,
            time_base: from_av_rational(self.time_base),
            frame_rate: from_av_rational(self.rate),
        }
    }
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        let duration = match stream.duration() {
            d if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d < 0 => None,
            d => Some(d),
        };
        Self {
            index: stream.index(),
            parameters: stream.parameters(),
            time_base: stream.time_base(),
            rate: stream.avg_frame_rate(),
            duration,
        }
    }
}

impl Clone for AvStream {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            rate: self.rate,
            duration: self.duration,
        }
    }
}
