use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::media::types::VideoFrame;

/// Consumer of decoded frames. Invoked on the receive worker thread, in
/// container read order.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &VideoFrame);
}

/// Adapts a plain `fn(buffer, width, height, timestamp_ms)` callback.
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&[u8], u32, u32, i64) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> FrameSink for CallbackSink<F>
where
    F: Fn(&[u8], u32, u32, i64) + Send + Sync,
{
    fn on_frame(&self, frame: &VideoFrame) {
        (self.callback)(&frame.data, frame.width, frame.height, frame.timestamp_ms);
    }
}

/// Bridges the receive worker into async code.
///
/// The worker never waits on the channel: when it is full the frame is
/// dropped and counted.
pub struct ChannelSink {
    writer: mpsc::Sender<VideoFrame>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new() -> (Self, VideoFrameStream) {
        Self::with_capacity(32)
    }

    pub fn with_capacity(buffer_size: usize) -> (Self, VideoFrameStream) {
        let (writer, receiver) = mpsc::channel(buffer_size.max(1));
        (
            Self {
                writer,
                dropped: AtomicU64::new(0),
            },
            VideoFrameStream { inner: receiver },
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameSink for ChannelSink {
    fn on_frame(&self, frame: &VideoFrame) {
        match self.writer.try_send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("frame stream closed, dropping frame");
            }
        }
    }
}

/// Receiving half of a [`ChannelSink`].
pub struct VideoFrameStream {
    inner: mpsc::Receiver<VideoFrame>,
}

impl VideoFrameStream {
    pub async fn recv(&mut self) -> Option<VideoFrame> {
        self.inner.recv().await
    }
}

impl Stream for VideoFrameStream {
    type Item = VideoFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.poll_recv(cx)
    }
}

/// Swappable sink slot shared by the caller and the receive worker.
///
/// A replacement applies to the next frame the worker dispatches; a frame
/// already being dispatched may still go to the previous sink.
#[derive(Default)]
pub(crate) struct SinkSlot {
    current: Mutex<Option<Arc<dyn FrameSink>>>,
}

impl SinkSlot {
    pub(crate) fn replace(&self, sink: Option<Arc<dyn FrameSink>>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }

    pub(crate) fn current(&self) -> Option<Arc<dyn FrameSink>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delivers `frame` outside the lock, so a sink may replace itself.
    /// Returns false when no sink is registered.
    pub(crate) fn dispatch(&self, frame: &VideoFrame) -> bool {
        match self.current() {
            Some(sink) => {
                sink.on_frame(frame);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "sink_test.rs"]
mod sink_test;
