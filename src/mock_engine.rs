//! In-memory codec engine for pipeline tests.
//!
//! Every handle it hands out bumps `live_handles` and releases it on drop,
//! so tests can assert nothing leaks after `stop()`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail};
use bytes::Bytes;

use crate::engine::{
    CodecEngine, ContainerReader, ContainerWriter, DecodedPicture, Drain, EncodedPacket,
    EncoderSettings, MediaKind, PixelConverter, ReadOutcome, ReaderOptions, SourcePacket,
    StreamInfo, VideoDecoder, VideoEncoder,
};
use crate::media::types::{Frame, PixelLayout, Region};
use crate::timebase::{MILLISECONDS, Rational};

#[derive(Default)]
pub(crate) struct MockState {
    pub live_handles: AtomicUsize,
    pub ready_calls: AtomicUsize,
    pub fail_ready: AtomicBool,

    // publish side
    pub fail_encoder: AtomicBool,
    pub fail_writer: AtomicBool,
    pub fail_packet_writes: AtomicBool,
    // the next N send_picture calls fail
    pub fail_sends: AtomicUsize,
    pub encoder_settings: Mutex<Option<EncoderSettings>>,
    pub headers: AtomicUsize,
    pub trailers: AtomicUsize,
    pub closes: AtomicUsize,
    pub converted: Mutex<Vec<i64>>,
    pub hinted: Mutex<Vec<Vec<Region>>>,
    pub sent_pts: Mutex<Vec<i64>>,
    pub written: Mutex<Vec<EncodedPacket>>,
    pub convert_delay: Mutex<Duration>,

    // receive side
    pub reader_options: Mutex<Option<ReaderOptions>>,
    pub fail_reader: AtomicBool,
    pub fail_decoder: AtomicBool,
    pub streams: Mutex<Vec<StreamInfo>>,
    pub script: Mutex<VecDeque<ReadOutcome<MockPacket>>>,
    pub eof_when_drained: AtomicBool,
    pub reads: AtomicUsize,
    pub read_delay: Mutex<Duration>,
    pub output_layout: Mutex<Option<PixelLayout>>,
    // decoded pictures with this pts fail conversion
    pub fail_convert_pts: Mutex<Option<i64>>,
}

impl MockState {
    pub fn live(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    pub fn written_count(&self) -> usize {
        self.written.lock().unwrap().len()
    }

    pub fn push_reads(&self, outcomes: impl IntoIterator<Item = ReadOutcome<MockPacket>>) {
        self.script.lock().unwrap().extend(outcomes);
    }
}

struct Live(Arc<MockState>);

impl Live {
    fn new(state: &Arc<MockState>) -> Self {
        state.live_handles.fetch_add(1, Ordering::SeqCst);
        Live(state.clone())
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        self.0.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockEngine {
    pub state: Arc<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose source has one 1/90000 video stream of the given size.
    pub fn with_video_source(width: u32, height: u32) -> Self {
        let engine = Self::new();
        *engine.state.streams.lock().unwrap() = vec![
            StreamInfo {
                index: 0,
                kind: MediaKind::Audio,
                codec: "aac".to_string(),
                width: 0,
                height: 0,
                time_base: Rational::new(1, 48_000),
                frame_rate: Rational::default(),
            },
            StreamInfo {
                index: 1,
                kind: MediaKind::Video,
                codec: "h264".to_string(),
                width,
                height,
                time_base: Rational::new(1, 90_000),
                frame_rate: Rational::new(30, 1),
            },
        ];
        engine
    }
}

// ------------------------------------------------------------------------
// Publish side
// ------------------------------------------------------------------------

pub(crate) struct MockPicture {
    pub timestamp: i64,
}

pub(crate) struct MockEncoder {
    time_base: Rational,
    layout: PixelLayout,
    // holds one picture back, like a codec with one frame of delay
    delayed: Option<i64>,
    ready: VecDeque<EncodedPacket>,
    eof: bool,
    state: Arc<MockState>,
    _live: Live,
}

impl MockEncoder {
    fn packet(&self, pts: i64) -> EncodedPacket {
        EncodedPacket {
            data: Bytes::from(vec![0u8; 16]),
            pts: Some(pts),
            dts: Some(pts),
            duration: 1,
            is_key: pts == 0,
            time_base: self.time_base,
        }
    }
}

impl VideoEncoder for MockEncoder {
    type Picture = MockPicture;

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn hint_regions(&mut self, regions: &[Region]) {
        self.state.hinted.lock().unwrap().push(regions.to_vec());
    }

    fn send_picture(&mut self, _picture: MockPicture, pts: i64) -> anyhow::Result<()> {
        if self.eof {
            bail!("encoder already flushed");
        }
        let failing = self
            .state
            .fail_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            bail!("resource temporarily unavailable");
        }
        self.state.sent_pts.lock().unwrap().push(pts);
        if let Some(previous) = self.delayed.replace(pts) {
            let packet = self.packet(previous);
            self.ready.push_back(packet);
        }
        Ok(())
    }

    fn send_eof(&mut self) -> anyhow::Result<()> {
        self.eof = true;
        if let Some(last) = self.delayed.take() {
            let packet = self.packet(last);
            self.ready.push_back(packet);
        }
        Ok(())
    }

    fn receive_packet(&mut self) -> anyhow::Result<Drain<EncodedPacket>> {
        match self.ready.pop_front() {
            Some(packet) => Ok(Drain::Ready(packet)),
            None if self.eof => Ok(Drain::EndOfStream),
            None => Ok(Drain::NeedsInput),
        }
    }
}

pub(crate) struct MockWriter {
    closed: bool,
    state: Arc<MockState>,
    _live: Live,
}

impl ContainerWriter for MockWriter {
    fn stream_time_base(&self) -> Rational {
        MILLISECONDS
    }

    fn write_header(&mut self) -> anyhow::Result<()> {
        self.state.headers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write_packet(&mut self, packet: EncodedPacket) -> anyhow::Result<()> {
        if self.closed {
            bail!("writer closed");
        }
        if self.state.fail_packet_writes.load(Ordering::SeqCst) {
            bail!("broken pipe");
        }
        self.state.written.lock().unwrap().push(packet);
        Ok(())
    }

    fn write_trailer(&mut self) -> anyhow::Result<()> {
        self.state.trailers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct MockFrameConverter {
    dst: PixelLayout,
    state: Arc<MockState>,
    _live: Live,
}

impl PixelConverter for MockFrameConverter {
    type Input = Frame;
    type Output = MockPicture;

    fn convert(&mut self, frame: &Frame) -> anyhow::Result<MockPicture> {
        if frame.width() != self.dst.width || frame.height() != self.dst.height {
            bail!(
                "frame {}x{} does not match encoder {}x{}",
                frame.width(),
                frame.height(),
                self.dst.width,
                self.dst.height
            );
        }
        let delay = *self.state.convert_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.state.converted.lock().unwrap().push(frame.timestamp());
        Ok(MockPicture {
            timestamp: frame.timestamp(),
        })
    }
}

// ------------------------------------------------------------------------
// Receive side
// ------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct MockPacket {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub corrupt: bool,
}

impl MockPacket {
    pub fn video(pts: Option<i64>) -> Self {
        Self {
            stream_index: 1,
            pts,
            corrupt: false,
        }
    }

    pub fn audio() -> Self {
        Self {
            stream_index: 0,
            pts: Some(0),
            corrupt: false,
        }
    }

    pub fn corrupt() -> Self {
        Self {
            stream_index: 1,
            pts: None,
            corrupt: true,
        }
    }
}

impl SourcePacket for MockPacket {
    fn stream_index(&self) -> usize {
        self.stream_index
    }
}

pub(crate) struct MockReader {
    streams: Vec<StreamInfo>,
    state: Arc<MockState>,
    _live: Live,
}

impl ContainerReader for MockReader {
    type Packet = MockPacket;

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> ReadOutcome<MockPacket> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.read_delay.lock().unwrap();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        match self.state.script.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None if self.state.eof_when_drained.load(Ordering::SeqCst) => ReadOutcome::EndOfStream,
            None => ReadOutcome::Again,
        }
    }
}

pub(crate) struct MockDecoded {
    pts: Option<i64>,
}

impl DecodedPicture for MockDecoded {
    fn pts(&self) -> Option<i64> {
        self.pts
    }
}

pub(crate) struct MockDecoder {
    ready: VecDeque<MockDecoded>,
    _live: Live,
}

impl VideoDecoder for MockDecoder {
    type Packet = MockPacket;
    type Picture = MockDecoded;

    fn send_packet(&mut self, packet: &MockPacket) -> anyhow::Result<()> {
        if packet.corrupt {
            bail!("invalid data found when processing input");
        }
        self.ready.push_back(MockDecoded { pts: packet.pts });
        Ok(())
    }

    fn receive_frame(&mut self) -> anyhow::Result<Drain<MockDecoded>> {
        Ok(match self.ready.pop_front() {
            Some(picture) => Drain::Ready(picture),
            None => Drain::NeedsInput,
        })
    }
}

pub(crate) struct MockPictureConverter {
    dst: PixelLayout,
    state: Arc<MockState>,
    _live: Live,
}

impl PixelConverter for MockPictureConverter {
    type Input = MockDecoded;
    type Output = Bytes;

    fn convert(&mut self, picture: &MockDecoded) -> anyhow::Result<Bytes> {
        let fail_at = *self.state.fail_convert_pts.lock().unwrap();
        if fail_at.is_some() && fail_at == picture.pts {
            bail!("cannot convert picture at pts {:?}", picture.pts);
        }
        let len = self
            .dst
            .packed_len()
            .ok_or_else(|| anyhow!("{:?} is not packed", self.dst.format))?;
        Ok(Bytes::from(vec![0u8; len]))
    }
}

impl CodecEngine for MockEngine {
    type Encoder = MockEncoder;
    type Writer = MockWriter;
    type FrameConverter = MockFrameConverter;
    type Reader = MockReader;
    type Decoder = MockDecoder;
    type Picture = MockDecoded;
    type PictureConverter = MockPictureConverter;

    fn ensure_ready(&self) -> anyhow::Result<()> {
        self.state.ready_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_ready.load(Ordering::SeqCst) {
            bail!("library init failed");
        }
        Ok(())
    }

    fn negotiate_encoder(&self, settings: &EncoderSettings) -> anyhow::Result<MockEncoder> {
        if self.state.fail_encoder.load(Ordering::SeqCst) {
            bail!("encoder {} not found", settings.codec);
        }
        *self.state.encoder_settings.lock().unwrap() = Some(settings.clone());
        Ok(MockEncoder {
            time_base: settings.frame_rate.recip(),
            layout: settings.layout,
            delayed: None,
            ready: VecDeque::new(),
            eof: false,
            state: self.state.clone(),
            _live: Live::new(&self.state),
        })
    }

    fn open_writer(
        &self,
        address: &str,
        _format: &str,
        _encoder: &MockEncoder,
    ) -> anyhow::Result<MockWriter> {
        if self.state.fail_writer.load(Ordering::SeqCst) {
            bail!("connection refused: {}", address);
        }
        Ok(MockWriter {
            closed: false,
            state: self.state.clone(),
            _live: Live::new(&self.state),
        })
    }

    fn frame_converter(
        &self,
        _src: PixelLayout,
        encoder: &MockEncoder,
    ) -> anyhow::Result<MockFrameConverter> {
        Ok(MockFrameConverter {
            dst: encoder.layout,
            state: self.state.clone(),
            _live: Live::new(&self.state),
        })
    }

    fn open_reader(&self, address: &str, options: &ReaderOptions) -> anyhow::Result<MockReader> {
        *self.state.reader_options.lock().unwrap() = Some(options.clone());
        if self.state.fail_reader.load(Ordering::SeqCst) {
            bail!("connection timed out: {}", address);
        }
        Ok(MockReader {
            streams: self.state.streams.lock().unwrap().clone(),
            state: self.state.clone(),
            _live: Live::new(&self.state),
        })
    }

    fn negotiate_decoder(
        &self,
        _reader: &MockReader,
        stream: &StreamInfo,
        _prefer_hardware: bool,
    ) -> anyhow::Result<MockDecoder> {
        if self.state.fail_decoder.load(Ordering::SeqCst) {
            bail!("decoder {} not found", stream.codec);
        }
        Ok(MockDecoder {
            ready: VecDeque::new(),
            _live: Live::new(&self.state),
        })
    }

    fn picture_converter(
        &self,
        _decoder: &MockDecoder,
        dst: PixelLayout,
    ) -> anyhow::Result<MockPictureConverter> {
        *self.state.output_layout.lock().unwrap() = Some(dst);
        Ok(MockPictureConverter {
            dst,
            state: self.state.clone(),
            _live: Live::new(&self.state),
        })
    }
}
