use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::engine::{
    CodecEngine, ContainerWriter, Drain, EncoderSettings, PixelConverter, VideoEncoder,
};
use crate::error::{BridgeError, BridgeResult};
use crate::media::handoff::FrameHandoff;
use crate::media::lifecycle::{Lifecycle, PipelineState};
use crate::media::types::{Frame, Region, StreamEndpoint};

/// Counters of a publisher, readable while it runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PublisherStats {
    /// Frames accepted by `push_frame`.
    pub frames_accepted: u64,
    /// Frames replaced in the handoff before the worker took them.
    pub frames_overwritten: u64,
    pub frames_encoded: u64,
    /// Frames the worker took but failed to convert or encode.
    pub frames_dropped: u64,
    pub packets_written: u64,
    pub write_failures: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    encoded: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    write_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Engine handles owned by the publish worker while running.
struct PublishResources<E: CodecEngine> {
    converter: E::FrameConverter,
    encoder: E::Encoder,
    writer: E::Writer,
}

/// Encodes pushed frames and publishes them to a live endpoint.
///
/// Frames go through a single-slot [`FrameHandoff`]: `push_frame` never
/// blocks and a frame the worker has not picked up yet is replaced by the
/// next one. The worker converts, encodes and writes at most one frame per
/// configured frame interval.
///
/// ```ignore
/// let endpoint = StreamEndpoint::builder("rtmp://localhost/live/cam")
///     .geometry(640, 480)
///     .build()?;
/// let publisher = StreamPublisher::new(FfmpegEngine::new(), endpoint)?;
/// publisher.start()?;
/// publisher.push_frame(frame);
/// publisher.stop();
/// ```
pub struct StreamPublisher<E: CodecEngine> {
    engine: Arc<E>,
    endpoint: StreamEndpoint,
    handoff: Arc<FrameHandoff>,
    counters: Arc<Counters>,
    lifecycle: Lifecycle<PublishResources<E>>,
}

impl<E: CodecEngine> StreamPublisher<E> {
    /// Validates `endpoint` and makes sure the engine is ready. Nothing is
    /// negotiated until [`StreamPublisher::initialize`] or [`StreamPublisher::start`].
    pub fn new(engine: impl Into<Arc<E>>, endpoint: StreamEndpoint) -> BridgeResult<Self> {
        endpoint.validate()?;
        let engine = engine.into();
        engine.ensure_ready().map_err(|e| {
            log::error!("codec engine not ready: {:#}", e);
            BridgeError::EngineInit(e)
        })?;
        Ok(Self {
            engine,
            endpoint,
            handoff: Arc::new(FrameHandoff::new()),
            counters: Arc::new(Counters::default()),
            lifecycle: Lifecycle::new("stream-publisher"),
        })
    }

    pub fn endpoint(&self) -> &StreamEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> PipelineState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub fn stats(&self) -> PublisherStats {
        let c = &self.counters;
        PublisherStats {
            frames_accepted: c.accepted.load(Ordering::Relaxed),
            frames_overwritten: self.handoff.overwritten(),
            frames_encoded: c.encoded.load(Ordering::Relaxed),
            frames_dropped: c.dropped.load(Ordering::Relaxed),
            packets_written: c.written.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Negotiates the encoder, opens the container writer and writes the
    /// header. A failure releases everything acquired so far.
    pub fn initialize(&self) -> BridgeResult<()> {
        self.lifecycle.initialize(|| self.negotiate())
    }

    /// Spawns the publish worker, initializing first if needed.
    pub fn start(&self) -> BridgeResult<()> {
        let handoff = self.handoff.clone();
        let worker = PublishWorker {
            handoff: self.handoff.clone(),
            counters: self.counters.clone(),
            interval: self.endpoint.frame_interval(),
        };
        self.lifecycle.start(
            || self.negotiate(),
            move || {
                handoff.open();
                move || handoff.close()
            },
            move |resources| worker.run(resources),
        )
    }

    /// Stops the worker, flushes the encoder, writes the trailer and closes
    /// the connection. Safe from any thread; later calls do nothing.
    pub fn stop(&self) {
        let counters = self.counters.clone();
        self.lifecycle.stop(
            || self.handoff.close(),
            |resources| finish(resources, &counters),
        );
    }

    /// Hands `frame` to the worker. Returns false when not running.
    pub fn push_frame(&self, frame: Frame) -> bool {
        if !self.handoff.push(frame) {
            return false;
        }
        Counters::bump(&self.counters.accepted);
        true
    }

    /// Copies a raw interleaved buffer into a frame and pushes it.
    ///
    /// Fails with [`BridgeError::Config`] when `data` does not hold exactly
    /// `width * height * channels` bytes; `Ok(false)` means not running.
    pub fn push_raw(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        channels: u32,
        timestamp: i64,
        regions: &[Region],
    ) -> BridgeResult<bool> {
        let frame = Frame::from_slice(data, width, height, channels, timestamp)?
            .with_regions(regions.iter().copied());
        Ok(self.push_frame(frame))
    }

    fn negotiate(&self) -> BridgeResult<PublishResources<E>> {
        let ep = &self.endpoint;
        let settings = EncoderSettings {
            codec: ep.codec.clone(),
            format: ep.format.clone(),
            width: ep.width,
            height: ep.height,
            frame_rate: ep.frame_rate(),
            bitrate: ep.bitrate,
            gop: ep.gop,
            quality: ep.quality,
            layout: ep.encoder_layout(),
            prefer_hardware: ep.prefer_hardware,
        };

        let encoder = self
            .engine
            .negotiate_encoder(&settings)
            .map_err(|e| init_failed("negotiate encoder", e))?;
        let converter = self
            .engine
            .frame_converter(ep.source_layout(), &encoder)
            .map_err(|e| init_failed("create frame converter", e))?;
        let mut writer = self
            .engine
            .open_writer(&ep.address, &ep.format, &encoder)
            .map_err(|e| init_failed("open container writer", e))?;
        writer
            .write_header()
            .map_err(|e| init_failed("write container header", e))?;

        log::info!(
            "publisher ready: {} ({}, {}x{} @ {} fps, {} bps, gop {}, quality {})",
            ep.address,
            ep.format,
            ep.width,
            ep.height,
            ep.fps,
            ep.bitrate,
            ep.gop,
            ep.quality
        );
        Ok(PublishResources {
            converter,
            encoder,
            writer,
        })
    }
}

impl<E: CodecEngine> Drop for StreamPublisher<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn init_failed(step: &str, e: anyhow::Error) -> BridgeError {
    log::error!("publisher init: {} failed: {:#}", step, e);
    BridgeError::EngineInit(e.context(format!("{} failed", step)))
}

struct PublishWorker {
    handoff: Arc<FrameHandoff>,
    counters: Arc<Counters>,
    interval: Duration,
}

impl PublishWorker {
    fn run<E: CodecEngine>(self, mut res: PublishResources<E>) -> PublishResources<E> {
        let mut sequence: i64 = 0;
        while let Some(frame) = self.handoff.take_blocking() {
            let started = Instant::now();
            self.process(&mut res, frame, &mut sequence);

            // coarse pacing, cut short by stop()
            let rest = self.interval.saturating_sub(started.elapsed());
            if !rest.is_zero() && self.handoff.wait_closed(rest) {
                break;
            }
        }
        log::debug!("publish worker exiting after {} frames", sequence);
        res
    }

    fn process<E: CodecEngine>(
        &self,
        res: &mut PublishResources<E>,
        frame: Frame,
        sequence: &mut i64,
    ) {
        let picture = match res.converter.convert(&frame) {
            Ok(picture) => picture,
            Err(e) => {
                log::warn!("convert {} failed: {:#}", frame, e);
                Counters::bump(&self.counters.dropped);
                return;
            }
        };

        let pts = *sequence;
        // region hints are not mapped to rate control yet
        for region in frame.regions() {
            log::debug!("frame {} region hint {}", pts, region);
        }
        res.encoder.hint_regions(frame.regions());

        if let Err(e) = res.encoder.send_picture(picture, pts) {
            log::warn!("encode frame {} failed: {:#}", pts, e);
            Counters::bump(&self.counters.dropped);
            return;
        }
        *sequence += 1;
        Counters::bump(&self.counters.encoded);

        drain(res, &self.counters);
    }
}

/// Writes every packet the encoder has ready, rescaled into the stream
/// time base. Write failures are counted and skipped.
fn drain<E: CodecEngine>(res: &mut PublishResources<E>, counters: &Counters) {
    loop {
        let mut packet = match res.encoder.receive_packet() {
            Ok(Drain::Ready(packet)) => packet,
            Ok(Drain::NeedsInput) | Ok(Drain::EndOfStream) => return,
            Err(e) => {
                log::warn!("receive packet failed: {:#}", e);
                return;
            }
        };
        packet.rescale(res.writer.stream_time_base());
        match res.writer.write_packet(packet) {
            Ok(()) => {
                Counters::bump(&counters.written);
            }
            Err(e) => {
                let failures = Counters::bump(&counters.write_failures);
                if failures == 1 || failures % 100 == 0 {
                    log::warn!("write packet failed ({} so far): {:#}", failures, e);
                }
            }
        }
    }
}

fn finish<E: CodecEngine>(mut res: PublishResources<E>, counters: &Counters) {
    match res.encoder.send_eof() {
        Ok(()) => drain(&mut res, counters),
        Err(e) => log::warn!("flush encoder failed: {:#}", e),
    }
    if let Err(e) = res.writer.write_trailer() {
        log::warn!("write trailer failed: {:#}", e);
    }
    if let Err(e) = res.writer.close() {
        log::warn!("close writer failed: {:#}", e);
    }
    log::info!(
        "publisher closed: {} frames encoded, {} packets written",
        counters.encoded.load(Ordering::Relaxed),
        counters.written.load(Ordering::Relaxed)
    );
}

#[cfg(test)]
#[path = "publisher_test.rs"]
mod publisher_test;
