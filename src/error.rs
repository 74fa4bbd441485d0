//! Caller-facing error taxonomy.
//!
//! Only failures a caller can act on are represented here. Transient and
//! fatal read conditions stay inside the receive worker as
//! [`crate::engine::ReadOutcome`] values, and per-frame failures are logged
//! and counted by the pipelines.

use thiserror::Error;

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Invalid geometry, rate or buffer size. Rejected before reaching a worker.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Codec or container negotiation failed while initializing a pipeline.
    #[error("engine initialization failed: {0:#}")]
    EngineInit(anyhow::Error),

    /// The receive source could not be opened or probed.
    #[error("cannot open source {address}: {reason:#}")]
    SourceOpen {
        address: String,
        reason: anyhow::Error,
    },

    /// The source carries no video stream.
    #[error("no video stream in {0}")]
    NoVideoStream(String),

    /// No usable decoder for the selected video stream.
    #[error("cannot open decoder: {0:#}")]
    DecoderOpen(anyhow::Error),

    /// A stopped pipeline must be recreated, never restarted in place.
    #[error("pipeline has been stopped")]
    Stopped,
}

impl BridgeError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
