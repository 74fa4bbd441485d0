//! Bidirectional real-time video bridge.
//!
//! ```text
//!  producer ──► FrameHandoff ──► [publish worker] ──► convert ──► encode ──► container writer
//!
//!  container reader ──► [receive worker] ──► decode ──► convert ──► FrameSink ──► consumer
//! ```
//!
//! The codec engine is an external collaborator described by the traits in
//! [`engine`]; `ffmpeg-engine` provides the FFmpeg implementation.

pub mod engine;
pub mod error;
pub mod media;
pub mod timebase;

pub use error::{BridgeError, BridgeResult};
pub use timebase::Rational;
pub use media::{
    handoff::FrameHandoff,
    lifecycle::PipelineState,
    publisher::{PublisherStats, StreamPublisher},
    rate::FrameRateEstimator,
    receiver::{ReceiverStats, StreamReceiver},
    sink::{CallbackSink, ChannelSink, FrameSink, VideoFrameStream},
    types::{
        Frame, PixelFormat, PixelLayout, ReceiverConfig, Region, StreamEndpoint,
        StreamEndpointBuilder, VideoFrame,
    },
};

#[cfg(test)]
pub(crate) mod mock_engine;
