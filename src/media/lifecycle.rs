//! Lifecycle shared by both pipelines.
//!
//! A pipeline owns a bundle of engine resources `R`. `initialize` creates it,
//! `start` moves it onto a dedicated worker thread, and `stop` signals the
//! worker, joins it, gets the bundle back and finishes it (flush, trailer,
//! close). Lifecycle calls are serialized by one control lock; the hot paths
//! (frame push, state reads) never touch that lock.

use std::fmt::{Display, Formatter};
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use serde::Serialize;

use crate::error::{BridgeError, BridgeResult};

/// `Uninitialized -> Initialized -> Running -> Stopped`, forward only.
/// Stopped is terminal: engine handles are gone and the pipeline must be
/// recreated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PipelineState {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
    Stopped = 3,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Uninitialized,
            1 => PipelineState::Initialized,
            2 => PipelineState::Running,
            _ => PipelineState::Stopped,
        }
    }
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        let s = match self {
            PipelineState::Uninitialized => "uninitialized",
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

struct Slots<R> {
    resources: Option<R>,
    worker: Option<JoinHandle<R>>,
}

pub(crate) struct Lifecycle<R> {
    name: String,
    state: AtomicU8,
    slots: Mutex<Slots<R>>,
    worker_id: Mutex<Option<ThreadId>>,
}

impl<R: Send + 'static> Lifecycle<R> {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(PipelineState::Uninitialized as u8),
            slots: Mutex::new(Slots {
                resources: None,
                worker: None,
            }),
            worker_id: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PipelineState) {
        self.swap_state(state);
    }

    fn swap_state(&self, state: PipelineState) -> PipelineState {
        let previous = PipelineState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        if previous != state {
            log::debug!("{}: {} -> {}", self.name, previous, state);
        }
        previous
    }

    fn lock(&self) -> MutexGuard<'_, Slots<R>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `init` once. Later calls succeed without effect until stopped.
    pub(crate) fn initialize<I>(&self, init: I) -> BridgeResult<()>
    where
        I: FnOnce() -> BridgeResult<R>,
    {
        let mut slots = self.lock();
        self.initialize_locked(&mut slots, init)
    }

    fn initialize_locked<I>(&self, slots: &mut Slots<R>, init: I) -> BridgeResult<()>
    where
        I: FnOnce() -> BridgeResult<R>,
    {
        match self.state() {
            PipelineState::Uninitialized => {
                // a failing init drops whatever it acquired before returning
                let resources = init()?;
                slots.resources = Some(resources);
                self.set_state(PipelineState::Initialized);
                Ok(())
            }
            PipelineState::Initialized | PipelineState::Running => Ok(()),
            PipelineState::Stopped => Err(BridgeError::Stopped),
        }
    }

    /// Initializes if needed, runs `arm` (open the gates the worker and
    /// callers observe) and spawns `run` on the worker thread. Idempotent
    /// while running: no second worker is ever spawned.
    ///
    /// `arm` returns the matching disarm, called when the worker cannot be
    /// spawned.
    pub(crate) fn start<I, A, D, W>(&self, init: I, arm: A, run: W) -> BridgeResult<()>
    where
        I: FnOnce() -> BridgeResult<R>,
        A: FnOnce() -> D,
        D: FnOnce(),
        W: FnOnce(R) -> R + Send + 'static,
    {
        let name = self.name.clone();
        self.start_with(init, arm, run, move |job| {
            thread::Builder::new().name(name).spawn(job)
        })
    }

    fn start_with<I, A, D, W, S>(&self, init: I, arm: A, run: W, spawn: S) -> BridgeResult<()>
    where
        I: FnOnce() -> BridgeResult<R>,
        A: FnOnce() -> D,
        D: FnOnce(),
        W: FnOnce(R) -> R + Send + 'static,
        S: FnOnce(Box<dyn FnOnce() -> R + Send>) -> io::Result<JoinHandle<R>>,
    {
        let mut slots = self.lock();
        match self.state() {
            PipelineState::Running => return Ok(()),
            PipelineState::Stopped => return Err(BridgeError::Stopped),
            PipelineState::Uninitialized => self.initialize_locked(&mut slots, init)?,
            PipelineState::Initialized => {}
        }

        let resources = slots.resources.take().ok_or_else(|| {
            BridgeError::EngineInit(anyhow::anyhow!("{}: resources missing", self.name))
        })?;

        let disarm = arm();
        self.set_state(PipelineState::Running);
        match spawn(Box::new(move || run(resources))) {
            Ok(handle) => {
                *self.worker_id.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(handle.thread().id());
                slots.worker = Some(handle);
                log::info!("{}: worker started", self.name);
                Ok(())
            }
            Err(e) => {
                // the closure and the resources in it are already dropped
                disarm();
                self.set_state(PipelineState::Stopped);
                Err(BridgeError::EngineInit(anyhow::anyhow!(
                    "{}: spawn worker: {}",
                    self.name,
                    e
                )))
            }
        }
    }

    fn on_worker_thread(&self) -> bool {
        self.worker_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|id| id == thread::current().id())
    }

    /// Moves to `Stopped`. When running, calls `signal` to make the worker
    /// leave its loop, joins it, then hands the resources to `finish`.
    /// Idempotent.
    ///
    /// Called from the worker itself (e.g. by a frame sink) it only signals:
    /// the worker cannot join itself, and a caller may be holding the
    /// control lock while joining it. A later `stop` from another thread
    /// still joins and finishes.
    pub(crate) fn stop<S, F>(&self, signal: S, finish: F)
    where
        S: FnOnce(),
        F: FnOnce(R),
    {
        if self.on_worker_thread() {
            if self.swap_state(PipelineState::Stopped) == PipelineState::Running {
                log::warn!("{}: stop requested from worker thread", self.name);
                signal();
            }
            return;
        }

        let mut slots = self.lock();
        let previous = self.swap_state(PipelineState::Stopped);
        match previous {
            PipelineState::Uninitialized => {}
            PipelineState::Initialized => {
                if let Some(resources) = slots.resources.take() {
                    finish(resources);
                }
            }
            PipelineState::Running | PipelineState::Stopped => {
                if previous == PipelineState::Running {
                    signal();
                }
                let Some(handle) = slots.worker.take() else {
                    return;
                };
                if handle.thread().id() == thread::current().id() {
                    // worker stopping before its id was recorded: detach,
                    // it drops the resources on exit
                    return;
                }
                match handle.join() {
                    Ok(resources) => finish(resources),
                    Err(_) => log::error!("{}: worker panicked", self.name),
                }
                log::info!("{}: worker stopped", self.name);
            }
        }
    }
}
