use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::media::types::Frame;

/// Single-slot mailbox between a producer thread and the publish worker.
///
/// Not a queue: a push overwrites any frame the worker has not taken yet, so
/// under backpressure only the freshest frame survives. The slot accepts
/// frames only while open, which mirrors the owning pipeline being `Running`.
pub struct FrameHandoff {
    slot: Mutex<Slot>,
    ready: Condvar,
}

#[derive(Default)]
struct Slot {
    // Some(_) doubles as the "new data" flag
    pending: Option<Frame>,
    open: bool,
    overwritten: u64,
}

impl FrameHandoff {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts accepting frames.
    pub fn open(&self) {
        let mut slot = self.lock();
        slot.open = true;
        slot.pending = None;
    }

    /// Stops accepting frames and wakes every waiting consumer, even when
    /// nothing is pending.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.open = false;
        self.ready.notify_all();
    }

    /// Stores `frame`, replacing any untaken one, and wakes one consumer.
    /// Returns false without touching the slot when closed.
    pub fn push(&self, frame: Frame) -> bool {
        let mut slot = self.lock();
        if !slot.open {
            return false;
        }
        if slot.pending.replace(frame).is_some() {
            slot.overwritten += 1;
        }
        self.ready.notify_one();
        true
    }

    /// Blocks until a frame is pending or the handoff is closed.
    ///
    /// A frame pushed before close is still handed out; `None` means the
    /// handoff is closed and empty.
    pub fn take_blocking(&self) -> Option<Frame> {
        let mut slot = self.lock();
        loop {
            if let Some(frame) = slot.pending.take() {
                return Some(frame);
            }
            if !slot.open {
                return None;
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Sleeps up to `timeout`, returning early (true) once the handoff is
    /// closed. Pushes do not end the wait.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let slot = self.lock();
        let (slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |slot| slot.open)
            .unwrap_or_else(PoisonError::into_inner);
        !slot.open
    }

    #[cfg(test)]
    pub(crate) fn try_take(&self) -> Option<Frame> {
        self.lock().pending.take()
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Frames replaced before the consumer took them.
    pub fn overwritten(&self) -> u64 {
        self.lock().overwritten
    }
}

impl Default for FrameHandoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "handoff_test.rs"]
mod handoff_test;
