use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use ffmpeg_engine::FfmpegEngine;
use futures::StreamExt;
use stream_bridge::{
    ChannelSink, Frame, FrameSink, PixelFormat, ReceiverConfig, StreamEndpoint,
    StreamEndpointBuilder, StreamPublisher, StreamReceiver, VideoFrame, VideoFrameStream,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::Mode;
use crate::pattern::TestPattern;
use crate::snapshot::Snapshot;

pub type Publisher = StreamPublisher<FfmpegEngine>;
pub type Receiver = StreamReceiver<FfmpegEngine>;

/// What the status API can see of the running bridge.
#[derive(Clone)]
pub struct BridgeState {
    pub mode: &'static str,
    pub publisher: Option<Arc<Publisher>>,
    pub receiver: Option<Arc<Receiver>>,
    pub snapshot: Arc<Snapshot>,
}

/// Hands every frame to several sinks in order.
pub struct FanOut(Vec<Arc<dyn FrameSink>>);

impl FanOut {
    pub fn new(sinks: Vec<Arc<dyn FrameSink>>) -> Self {
        Self(sinks)
    }
}

impl FrameSink for FanOut {
    fn on_frame(&self, frame: &VideoFrame) {
        for sink in &self.0 {
            sink.on_frame(frame);
        }
    }
}

/// Pushes received BGR frames into a publisher.
pub struct RelaySink {
    publisher: Arc<Publisher>,
    rejected: AtomicU64,
}

impl RelaySink {
    pub fn new(publisher: Arc<Publisher>) -> Self {
        Self {
            publisher,
            rejected: AtomicU64::new(0),
        }
    }
}

impl FrameSink for RelaySink {
    fn on_frame(&self, frame: &VideoFrame) {
        let pushed = Frame::new(
            frame.data.clone(),
            frame.width,
            frame.height,
            3,
            frame.timestamp_ms,
        )
        .map(|f| self.publisher.push_frame(f));
        match pushed {
            Ok(true) => {}
            Ok(false) => {
                let n = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
                if n == 1 {
                    log::warn!("publisher not running, dropping relayed frames");
                }
            }
            Err(e) => log::warn!("relay {}: {}", frame, e),
        }
    }
}

/// A running publish, receive or relay setup.
pub struct Bridge {
    state: BridgeState,
    tasks: Vec<JoinHandle<()>>,
}

/// Runs a blocking pipeline call off the async runtime.
async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> stream_bridge::BridgeResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

impl Bridge {
    pub async fn start(mode: Mode, cancel: CancellationToken) -> anyhow::Result<Self> {
        let name = mode.name();
        match mode {
            Mode::Publish(endpoint) => Self::publish(name, endpoint, cancel).await,
            Mode::Receive(config) => Self::receive(name, config, cancel).await,
            Mode::Relay { source, target } => Self::relay(name, source, target, cancel).await,
            Mode::Probe { .. } => anyhow::bail!("probe does not run a bridge"),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state.clone()
    }

    async fn publish(
        mode: &'static str,
        endpoint: StreamEndpoint,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let interval = endpoint.frame_interval();
        let (width, height) = (endpoint.width, endpoint.height);
        let publisher = Arc::new(Publisher::new(FfmpegEngine::new(), endpoint)?);
        let p = publisher.clone();
        blocking(move || p.start()).await?;

        let snapshot = Snapshot::new(PixelFormat::Bgr24);
        let task = tokio::spawn(pattern_loop(
            publisher.clone(),
            snapshot.clone(),
            TestPattern::new(width, height),
            interval,
            cancel,
        ));
        Ok(Self {
            state: BridgeState {
                mode,
                publisher: Some(publisher),
                receiver: None,
                snapshot,
            },
            tasks: vec![task],
        })
    }

    async fn receive(
        mode: &'static str,
        config: ReceiverConfig,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let snapshot = Snapshot::new(config.pixel_format);
        let receiver = Arc::new(Receiver::new(FfmpegEngine::new(), config)?);
        let (channel, frames) = ChannelSink::new();
        receiver.set_frame_sink(Arc::new(FanOut::new(vec![
            snapshot.clone(),
            Arc::new(channel),
        ])));
        let r = receiver.clone();
        blocking(move || r.start()).await?;

        let tasks = vec![
            tokio::spawn(consume_frames(frames, cancel.clone())),
            tokio::spawn(watch_source(receiver.clone(), cancel)),
        ];
        Ok(Self {
            state: BridgeState {
                mode,
                publisher: None,
                receiver: Some(receiver),
                snapshot,
            },
            tasks,
        })
    }

    async fn relay(
        mode: &'static str,
        source: ReceiverConfig,
        target: StreamEndpointBuilder,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let mut source = source.with_pixel_format(PixelFormat::Bgr24);
        if source.output_width.is_none() || source.output_height.is_none() {
            // 4:2:0 output wants even dimensions; probe and round down
            let address = source.address.clone();
            let timeout = Duration::from_millis(source.connect_timeout_ms);
            let info = tokio::task::spawn_blocking(move || ffmpeg_engine::probe(&address, timeout))
                .await??;
            let video = info.video().context("source has no video stream")?;
            let (w, h) = (video.width.unwrap_or(0), video.height.unwrap_or(0));
            source = source.with_output_size(w & !1, h & !1);
        }
        let snapshot = Snapshot::new(PixelFormat::Bgr24);

        let receiver = Arc::new(Receiver::new(FfmpegEngine::new(), source)?);
        let r = receiver.clone();
        blocking(move || r.initialize()).await?;

        let endpoint = target
            .geometry(receiver.width(), receiver.height())
            .channels(3)
            .build()?;
        let publisher = Arc::new(Publisher::new(FfmpegEngine::new(), endpoint)?);
        let p = publisher.clone();
        blocking(move || p.start()).await?;

        receiver.set_frame_sink(Arc::new(FanOut::new(vec![
            snapshot.clone(),
            Arc::new(RelaySink::new(publisher.clone())),
        ])));
        let r = receiver.clone();
        blocking(move || r.start()).await?;

        let tasks = vec![tokio::spawn(watch_source(receiver.clone(), cancel))];
        Ok(Self {
            state: BridgeState {
                mode,
                publisher: Some(publisher),
                receiver: Some(receiver),
                snapshot,
            },
            tasks,
        })
    }

    /// Stops the receiver before the publisher so relayed frames stop first.
    pub async fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
        let BridgeState {
            publisher,
            receiver,
            ..
        } = self.state;
        let stopped = tokio::task::spawn_blocking(move || {
            if let Some(receiver) = receiver {
                receiver.stop();
                log::info!("receiver stats: {:?}", receiver.stats());
            }
            if let Some(publisher) = publisher {
                publisher.stop();
                log::info!("publisher stats: {:?}", publisher.stats());
            }
        })
        .await;
        if let Err(e) = stopped {
            log::error!("shutdown failed: {}", e);
        }
    }
}

async fn pattern_loop(
    publisher: Arc<Publisher>,
    snapshot: Arc<Snapshot>,
    mut pattern: TestPattern,
    interval: Duration,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let frame = match pattern.next_frame(started.elapsed().as_millis() as i64) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("test pattern: {}", e);
                        cancel.cancel();
                        break;
                    }
                };
                snapshot.update(&VideoFrame {
                    data: bytes::Bytes::copy_from_slice(frame.data()),
                    width: frame.width(),
                    height: frame.height(),
                    timestamp_ms: frame.timestamp(),
                });
                if !publisher.push_frame(frame) {
                    log::warn!("publisher stopped, ending test pattern");
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}

async fn consume_frames(mut frames: VideoFrameStream, cancel: CancellationToken) {
    let mut count: u64 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.next() => {
                let Some(frame) = frame else { break };
                count += 1;
                if count == 1 || count % 100 == 0 {
                    log::info!("frame #{}: {}", count, frame);
                }
            }
        }
    }
}

/// Cancels everything once the source stops on its own (end of stream or
/// too many read errors).
async fn watch_source(receiver: Arc<Receiver>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if !receiver.is_streaming() {
                    log::info!("source {} ended", receiver.config().address);
                    cancel.cancel();
                    break;
                }
                log::debug!(
                    "{}: {:.1} fps, {:?}",
                    receiver.config().address,
                    receiver.frame_rate(),
                    receiver.stats()
                );
            }
        }
    }
}
