use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::engine::{
    CodecEngine, ContainerReader, DecodedPicture, Drain, PixelConverter, ReadOutcome,
    ReaderOptions, SourcePacket, StreamInfo, VideoDecoder,
};
use crate::error::{BridgeError, BridgeResult};
use crate::media::lifecycle::{Lifecycle, PipelineState};
use crate::media::rate::{AtomicF64, FrameRateEstimator};
use crate::media::sink::{CallbackSink, FrameSink, SinkSlot};
use crate::media::types::{PixelLayout, ReceiverConfig, VideoFrame};
use crate::timebase::{MILLISECONDS, Rational};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    pub packets_read: u64,
    pub frames_decoded: u64,
    /// Frames handed to a sink.
    pub frames_delivered: u64,
    /// Frames lost to decode or conversion failures.
    pub frames_dropped: u64,
    pub read_errors: u64,
}

/// State shared between the caller and the receive worker.
#[derive(Default)]
struct Shared {
    running: AtomicBool,
    // false once the worker left its loop on its own (end of stream)
    streaming: AtomicBool,
    sink: SinkSlot,
    fps: AtomicF64,
    width: AtomicU32,
    height: AtomicU32,
    packets_read: AtomicU64,
    decoded: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    read_errors: AtomicU64,
}

struct ReceiveResources<E: CodecEngine> {
    reader: E::Reader,
    decoder: E::Decoder,
    converter: E::PictureConverter,
    stream: StreamInfo,
    output: PixelLayout,
}

/// Pulls a live stream, decodes its first video stream and delivers
/// converted frames to a registered [`FrameSink`].
pub struct StreamReceiver<E: CodecEngine> {
    engine: Arc<E>,
    config: ReceiverConfig,
    shared: Arc<Shared>,
    lifecycle: Lifecycle<ReceiveResources<E>>,
}

impl<E: CodecEngine> StreamReceiver<E> {
    pub fn new(engine: impl Into<Arc<E>>, config: ReceiverConfig) -> BridgeResult<Self> {
        config.validate()?;
        let engine = engine.into();
        engine.ensure_ready().map_err(|e| {
            log::error!("codec engine not ready: {:#}", e);
            BridgeError::EngineInit(e)
        })?;
        Ok(Self {
            engine,
            config,
            shared: Arc::new(Shared::default()),
            lifecycle: Lifecycle::new("stream-receiver"),
        })
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.lifecycle.state()
    }

    /// Running and still reading; false once the source ended.
    pub fn is_streaming(&self) -> bool {
        self.state() == PipelineState::Running && self.shared.streaming.load(Ordering::Acquire)
    }

    /// Trailing frames-per-second estimate, 0 until a full second was seen.
    pub fn frame_rate(&self) -> f64 {
        self.shared.fps.load()
    }

    /// Output width, 0 before initialization.
    pub fn width(&self) -> u32 {
        self.shared.width.load(Ordering::Acquire)
    }

    /// Output height, 0 before initialization.
    pub fn height(&self) -> u32 {
        self.shared.height.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ReceiverStats {
        let s = &self.shared;
        ReceiverStats {
            packets_read: s.packets_read.load(Ordering::Relaxed),
            frames_decoded: s.decoded.load(Ordering::Relaxed),
            frames_delivered: s.delivered.load(Ordering::Relaxed),
            frames_dropped: s.dropped.load(Ordering::Relaxed),
            read_errors: s.read_errors.load(Ordering::Relaxed),
        }
    }

    /// Registers `callback(buffer, width, height, timestamp_ms)`, replacing
    /// any previous one from the next decoded frame on.
    pub fn set_frame_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8], u32, u32, i64) + Send + Sync + 'static,
    {
        self.shared
            .sink
            .replace(Some(Arc::new(CallbackSink::new(callback))));
    }

    pub fn set_frame_sink(&self, sink: Arc<dyn FrameSink>) {
        self.shared.sink.replace(Some(sink));
    }

    /// Opens the source, picks the first video stream and opens its decoder.
    pub fn initialize(&self) -> BridgeResult<()> {
        self.lifecycle.initialize(|| self.open())
    }

    pub fn start(&self) -> BridgeResult<()> {
        let shared = self.shared.clone();
        let worker = ReceiveWorker {
            shared: self.shared.clone(),
            config: self.config.clone(),
        };
        self.lifecycle.start(
            || self.open(),
            move || {
                shared.streaming.store(true, Ordering::Release);
                shared.running.store(true, Ordering::Release);
                move || {
                    shared.running.store(false, Ordering::Release);
                    shared.streaming.store(false, Ordering::Release);
                }
            },
            move |resources| worker.run(resources),
        )
    }

    /// Stops reading and releases the source. Safe from any thread,
    /// including from inside a frame callback.
    pub fn stop(&self) {
        self.lifecycle.stop(
            || self.shared.running.store(false, Ordering::Release),
            |resources| {
                log::info!(
                    "receiver closed: {} ({} frames delivered)",
                    self.config.address,
                    self.shared.delivered.load(Ordering::Relaxed)
                );
                drop(resources);
            },
        );
    }

    fn open(&self) -> BridgeResult<ReceiveResources<E>> {
        let address = &self.config.address;
        let options = ReaderOptions {
            reliable_transport: true,
            connect_timeout: Duration::from_millis(self.config.connect_timeout_ms),
            max_delay: Duration::from_millis(self.config.max_delay_ms),
            prefer_hardware: self.config.prefer_hardware,
        };

        let reader = self
            .engine
            .open_reader(address, &options)
            .map_err(|reason| {
                log::error!("open {} failed: {:#}", address, reason);
                BridgeError::SourceOpen {
                    address: address.clone(),
                    reason,
                }
            })?;

        let stream = reader
            .streams()
            .iter()
            .find(|s| s.is_video())
            .cloned()
            .ok_or_else(|| {
                log::error!("no video stream in {}", address);
                BridgeError::NoVideoStream(address.clone())
            })?;

        let decoder = self
            .engine
            .negotiate_decoder(&reader, &stream, self.config.prefer_hardware)
            .map_err(|e| {
                log::error!("open {} decoder failed: {:#}", stream.codec, e);
                BridgeError::DecoderOpen(e)
            })?;

        let (width, height) = self.config.output_geometry(stream.width, stream.height);
        if width == 0 || height == 0 {
            return Err(BridgeError::DecoderOpen(anyhow::anyhow!(
                "unknown frame size for stream #{}",
                stream.index
            )));
        }
        let output = PixelLayout::new(self.config.pixel_format, width, height);
        let converter = self
            .engine
            .picture_converter(&decoder, output)
            .map_err(|e| {
                log::error!("create converter failed: {:#}", e);
                BridgeError::DecoderOpen(e)
            })?;

        self.shared.width.store(width, Ordering::Release);
        self.shared.height.store(height, Ordering::Release);
        log::info!(
            "receiver ready: {} stream #{} {} {}x{} tb={} -> {:?} {}x{}",
            address,
            stream.index,
            stream.codec,
            stream.width,
            stream.height,
            stream.time_base,
            output.format,
            width,
            height
        );
        Ok(ReceiveResources {
            reader,
            decoder,
            converter,
            stream,
            output,
        })
    }
}

impl<E: CodecEngine> Drop for StreamReceiver<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ReceiveWorker {
    shared: Arc<Shared>,
    config: ReceiverConfig,
}

impl ReceiveWorker {
    fn run<E: CodecEngine>(self, mut res: ReceiveResources<E>) -> ReceiveResources<E> {
        let mut estimator = FrameRateEstimator::new();
        let mut consecutive_errors: u32 = 0;

        while self.shared.running.load(Ordering::Acquire) {
            match res.reader.read_packet() {
                ReadOutcome::EndOfStream => {
                    log::info!("{}: end of stream", self.config.address);
                    break;
                }
                ReadOutcome::Again => {
                    thread::sleep(self.config.transient_backoff());
                    continue;
                }
                ReadOutcome::Failed(e) => {
                    consecutive_errors += 1;
                    self.shared.read_errors.fetch_add(1, Ordering::Relaxed);
                    log::warn!("{}: read failed: {:#}", self.config.address, e);
                    let exhausted = self
                        .config
                        .max_consecutive_read_errors
                        .is_some_and(|limit| consecutive_errors >= limit);
                    if exhausted {
                        log::error!(
                            "{}: giving up after {} consecutive read errors",
                            self.config.address,
                            consecutive_errors
                        );
                        break;
                    }
                    thread::sleep(self.config.error_backoff());
                    continue;
                }
                ReadOutcome::Packet(packet) => {
                    consecutive_errors = 0;
                    self.shared.packets_read.fetch_add(1, Ordering::Relaxed);
                    if packet.stream_index() == res.stream.index {
                        self.decode(&mut res, &packet, &mut estimator);
                    }
                    // packet released here
                }
            }
            thread::sleep(self.config.idle_sleep());
        }

        self.shared.streaming.store(false, Ordering::Release);
        res
    }

    fn decode<E: CodecEngine>(
        &self,
        res: &mut ReceiveResources<E>,
        packet: &<E::Reader as ContainerReader>::Packet,
        estimator: &mut FrameRateEstimator,
    ) {
        if let Err(e) = res.decoder.send_packet(packet) {
            log::warn!("decode failed: {:#}", e);
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        loop {
            match res.decoder.receive_frame() {
                Ok(Drain::Ready(picture)) => {
                    self.shared.decoded.fetch_add(1, Ordering::Relaxed);
                    self.deliver(res, &picture, estimator);
                }
                Ok(Drain::NeedsInput) | Ok(Drain::EndOfStream) => break,
                Err(e) => {
                    log::warn!("receive frame failed: {:#}", e);
                    self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }
    }

    fn deliver<E: CodecEngine>(
        &self,
        res: &mut ReceiveResources<E>,
        picture: &E::Picture,
        estimator: &mut FrameRateEstimator,
    ) {
        let data = match res.converter.convert(picture) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("convert frame failed: {:#}", e);
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let timestamp_ms = to_millis(picture.pts(), res.stream.time_base);
        if let Some(fps) = estimator.record(Instant::now()) {
            self.shared.fps.store(fps);
        }

        let frame = VideoFrame {
            data,
            width: res.output.width,
            height: res.output.height,
            timestamp_ms,
        };
        if self.shared.sink.dispatch(&frame) {
            self.shared.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Presentation timestamp in milliseconds; unknown pts counts as zero.
fn to_millis(pts: Option<i64>, time_base: Rational) -> i64 {
    Rational::rescale(pts.unwrap_or(0), time_base, MILLISECONDS)
}

#[cfg(test)]
#[path = "receiver_test.rs"]
mod receiver_test;
