//! FFmpeg-backed [`CodecEngine`](stream_bridge::engine::CodecEngine) for
//! `stream-bridge` publishers and receivers.

use std::sync::OnceLock;

pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod frame;
pub mod hw;
pub mod input;
pub mod metadata;
pub mod output;
pub mod packet;
pub mod scaler;
pub mod stream;

pub use engine::FfmpegEngine;
pub use metadata::{MediaInfo, probe};

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Registers FFmpeg components (formats, devices, network). Runs once per
/// process; later calls return the first outcome.
pub fn init() -> anyhow::Result<()> {
    let outcome = INIT.get_or_init(|| {
        ffmpeg_next::init().map_err(|e| format!("ffmpeg_next init: {}", e))?;
        ffmpeg_next::format::network::init();
        log::debug!("ffmpeg initialized");
        Ok(())
    });
    outcome.clone().map_err(|e| anyhow::anyhow!(e))
}
