use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use jpeg_encoder::{ColorType, Encoder};
use stream_bridge::{FrameSink, PixelFormat, VideoFrame};
use tokio_util::sync::CancellationToken;

const JPEG_QUALITY: u8 = 80;

fn color_type(format: PixelFormat) -> Option<ColorType> {
    match format {
        PixelFormat::Gray8 => Some(ColorType::Luma),
        PixelFormat::Rgb24 => Some(ColorType::Rgb),
        PixelFormat::Bgr24 => Some(ColorType::Bgr),
        PixelFormat::Rgba => Some(ColorType::Rgba),
        PixelFormat::Bgra => Some(ColorType::Bgra),
        PixelFormat::Yuv420p => None,
    }
}

/// Encodes a packed frame as JPEG.
pub fn encode_jpeg(frame: &VideoFrame, format: PixelFormat) -> anyhow::Result<Vec<u8>> {
    let Some(color) = color_type(format) else {
        bail!("cannot encode {:?} as jpeg", format);
    };
    let expected = format.bytes_per_pixel().and_then(|bpp| {
        (frame.width as usize)
            .checked_mul(frame.height as usize)?
            .checked_mul(bpp as usize)
    });
    if expected != Some(frame.data.len()) {
        bail!(
            "{} bytes do not hold a {}x{} {:?} frame",
            frame.data.len(),
            frame.width,
            frame.height,
            format
        );
    }
    let (Ok(width), Ok(height)) = (u16::try_from(frame.width), u16::try_from(frame.height)) else {
        bail!("{}x{} is too large for jpeg", frame.width, frame.height);
    };

    let mut jpeg = Vec::new();
    Encoder::new(&mut jpeg, JPEG_QUALITY).encode(&frame.data, width, height, color)?;
    Ok(jpeg)
}

/// Keeps the most recent frame for `/snapshot.jpg`.
pub struct Snapshot {
    format: PixelFormat,
    latest: Mutex<Option<VideoFrame>>,
}

impl Snapshot {
    pub fn new(format: PixelFormat) -> Arc<Self> {
        Arc::new(Self {
            format,
            latest: Mutex::new(None),
        })
    }

    pub fn update(&self, frame: &VideoFrame) {
        if let Ok(mut latest) = self.latest.lock() {
            // Bytes clone, no pixel copy
            *latest = Some(frame.clone());
        }
    }

    pub fn latest(&self) -> Option<VideoFrame> {
        self.latest.lock().ok().and_then(|latest| latest.clone())
    }

    /// Latest frame as JPEG, None until a frame arrived.
    pub fn jpeg(&self) -> anyhow::Result<Option<Vec<u8>>> {
        match self.latest() {
            Some(frame) => encode_jpeg(&frame, self.format).map(Some),
            None => Ok(None),
        }
    }
}

/// Rewrites `path` with the latest frame once a second, skipping frames
/// already written.
pub async fn write_periodically(snapshot: Arc<Snapshot>, path: PathBuf, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut written = None;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(frame) = snapshot.latest() else { continue };
                if written == Some(frame.timestamp_ms) {
                    continue;
                }
                let jpeg = match encode_jpeg(&frame, snapshot.format) {
                    Ok(jpeg) => jpeg,
                    Err(e) => {
                        log::warn!("snapshot {}: {:#}", frame, e);
                        continue;
                    }
                };
                if let Err(e) = tokio::fs::write(&path, jpeg).await {
                    log::warn!("write snapshot {}: {}", path.display(), e);
                    continue;
                }
                written = Some(frame.timestamp_ms);
            }
        }
    }
}

impl FrameSink for Snapshot {
    fn on_frame(&self, frame: &VideoFrame) {
        self.update(frame);
    }
}
