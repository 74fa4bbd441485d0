use anyhow::bail;
use ffmpeg_next::Dictionary;
use stream_bridge::Rational;
use stream_bridge::engine::{ContainerWriter, EncodedPacket};

use crate::encoder::VideoEncoder;
use crate::input::is_rtsp;
use crate::packet::from_encoded;
use crate::stream::from_av_rational;

/// Muxer options applied when writing the header.
pub fn writer_dictionary(url: &str, format: &str) -> Option<Dictionary<'static>> {
    // RTSP output needs rtsp_transport=tcp for the ANNOUNCE/RECORD handshake
    if format == "rtsp" || is_rtsp(url) {
        let mut opts = Dictionary::new();
        opts.set("rtsp_transport", "tcp");
        return Some(opts);
    }
    None
}

/// Output container with a single video stream.
pub struct AvOutput {
    address: String,
    inner: ffmpeg_next::format::context::Output,
    stream_index: usize,
    encoder_time_base: Rational,
    header_options: Option<Dictionary<'static>>,
    have_written_header: bool,
    have_written_trailer: bool,
    closed: bool,
}

unsafe impl Send for AvOutput {}

impl AvOutput {
    /// Allocates the muxer for `format` and opens `url` for writing. The
    /// stream takes its codec parameters from `encoder`.
    pub fn open(url: &str, format: &str, encoder: &VideoEncoder) -> anyhow::Result<Self> {
        let mut output = ffmpeg_next::format::output_as(url, format)
            .map_err(|e| anyhow::anyhow!("open output {} as {}: {}", url, format, e))?;

        let stream_index = {
            let mut stream = output.add_stream(ffmpeg_next::encoder::find(encoder.get().id()))?;
            stream.set_parameters(encoder.get());
            stream.set_time_base(encoder.av_time_base());
            stream.index()
        };

        Ok(Self {
            address: url.to_string(),
            inner: output,
            stream_index,
            encoder_time_base: from_av_rational(encoder.av_time_base()),
            header_options: writer_dictionary(url, format),
            have_written_header: false,
            have_written_trailer: false,
            closed: false,
        })
    }
}

impl ContainerWriter for AvOutput {
    fn stream_time_base(&self) -> Rational {
        // the muxer may replace the time base while writing the header
        self.inner
            .stream(self.stream_index)
            .map(|s| from_av_rational(s.time_base()))
            .filter(Rational::is_valid)
            .unwrap_or(self.encoder_time_base)
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        if self.have_written_header {
            return Ok(());
        }
        match self.header_options.take() {
            Some(opts) => {
                self.inner.write_header_with(opts)?;
            }
            None => self.inner.write_header()?,
        }
        self.have_written_header = true;
        Ok(())
    }

    fn write_packet(&mut self, packet: EncodedPacket) -> anyhow::Result<()> {
        if self.closed {
            bail!("output {} is closed", self.address);
        }
        if !self.have_written_header {
            bail!("output {} has no header yet", self.address);
        }
        let p = from_encoded(&packet, self.stream_index);
        p.write_interleaved(&mut self.inner)?;
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        if self.have_written_header && !self.have_written_trailer && !self.closed {
            self.have_written_trailer = true;
            self.inner.write_trailer()?;
        }
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // avio_closep leaves a null pb, which the context destructor skips
        let ret = unsafe { ffmpeg_next::ffi::avio_closep(&mut (*self.inner.as_mut_ptr()).pb) };
        if ret < 0 {
            return Err(ffmpeg_next::Error::from(ret).into());
        }
        log::debug!("output {} closed", self.address);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtsp_output_uses_tcp() {
        let opts = writer_dictionary("rtsp://server/live", "rtsp").unwrap();
        assert_eq!(opts.get("rtsp_transport"), Some("tcp"));
        assert!(writer_dictionary("rtmp://server/live/cam", "flv").is_none());
    }
}
