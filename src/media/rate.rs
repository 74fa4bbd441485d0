use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Trailing frames-per-second estimate over one-second windows.
///
/// The first recorded frame opens a window; every later frame is counted and
/// once a full second has elapsed the rate is published and the window
/// restarts.
#[derive(Debug, Default)]
pub struct FrameRateEstimator {
    window_start: Option<Instant>,
    count: u32,
}

impl FrameRateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one frame seen at `now`. Returns the new estimate when a
    /// window closes.
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            self.count = 0;
            return None;
        };
        self.count += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed < WINDOW {
            return None;
        }
        let fps = self.count as f64 / elapsed.as_secs_f64();
        self.window_start = Some(now);
        self.count = 0;
        Some(fps)
    }
}

/// f64 readable from any thread without locking.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}
