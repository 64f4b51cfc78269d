//! Background transform thread with single-slot handoff.
//!
//! The host thread hands each published frame to [`TransformWorker::exchange`],
//! which never waits for the transform: it collects whatever result the worker
//! finished since the last call, leaves a copy of the new frame in the job
//! slot (replacing an older job the worker has not picked up yet) and writes
//! the most recent finished output back into the caller's frame.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arcam_core::FrameImage;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{lock, FrameTransform, TransformError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running,
    Stopped,
}

/// Counters of a [`TransformWorker`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Frames handed to the job slot.
    pub submitted: u64,
    /// Transform calls finished by the worker, successful or not.
    pub completed: u64,
    /// Jobs overwritten by a newer frame before the worker took them.
    pub replaced: u64,
}

type FrameResult = Result<Vec<FrameImage>, TransformError>;

#[derive(Default)]
struct Slots {
    running: bool,
    job: Option<Vec<FrameImage>>,
    result: Option<FrameResult>,
    stats: WorkerStats,
}

#[derive(Default)]
struct Shared {
    slots: Mutex<Slots>,
    wakeup: Condvar,
}

/// Read-only handle on a worker's counters and result slot.
#[derive(Clone)]
pub struct WorkerMonitor {
    shared: Arc<Shared>,
}

impl WorkerMonitor {
    pub fn stats(&self) -> WorkerStats {
        lock(&self.shared.slots).stats
    }

    /// Block until the worker has a result waiting or has stopped, at most
    /// `timeout`. Returns `true` if a result is waiting.
    pub fn wait_for_result(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slots = lock(&self.shared.slots);
        loop {
            if slots.result.is_some() {
                return true;
            }
            if !slots.running {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            slots = match self.shared.wakeup.wait_timeout(slots, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// Runs a [`FrameTransform`] on its own thread.
pub struct TransformWorker {
    name: String,
    state: WorkerState,
    shared: Arc<Shared>,
    transform: Option<Box<dyn FrameTransform>>,
    handle: Option<JoinHandle<()>>,
    // Host-side buffers: last delivered output and a recycled job buffer.
    latest: Option<Vec<FrameImage>>,
    spare: Vec<FrameImage>,
}

impl TransformWorker {
    pub fn new(name: impl Into<String>, transform: Box<dyn FrameTransform>) -> Self {
        Self {
            name: name.into(),
            state: WorkerState::NotStarted,
            shared: Arc::new(Shared::default()),
            transform: Some(transform),
            handle: None,
            latest: None,
            spare: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn monitor(&self) -> WorkerMonitor {
        WorkerMonitor {
            shared: self.shared.clone(),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        lock(&self.shared.slots).stats
    }

    /// Spawn the worker thread. Only valid once, from `NotStarted`.
    pub fn start(&mut self) -> Result<(), TransformError> {
        let Some(transform) = self.transform.take() else {
            return Err(TransformError::WorkerStopped);
        };
        lock(&self.shared.slots).running = true;
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-worker", self.name))
            .spawn(move || worker_loop(&shared, transform));
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = WorkerState::Running;
                log::debug!("transform worker `{}` started", self.name);
                Ok(())
            }
            Err(err) => {
                lock(&self.shared.slots).running = false;
                self.state = WorkerState::Stopped;
                Err(TransformError::Spawn(err))
            }
        }
    }

    /// Hand `frames` to the worker and replace them with the latest output.
    ///
    /// Returns the error of a failed transform call as soon as it is seen;
    /// in that case nothing is submitted and `frames` are left untouched.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip_all, fields(name = %self.name))
    )]
    pub fn exchange(&mut self, frames: &mut [FrameImage]) -> Result<(), TransformError> {
        if self.state != WorkerState::Running {
            return Err(TransformError::WorkerStopped);
        }

        let delivered = {
            let mut slots = lock(&self.shared.slots);
            let delivered = slots.result.take();
            if matches!(delivered, Some(Err(_))) {
                delivered
            } else {
                let mut job = std::mem::take(&mut self.spare);
                copy_frames(&mut job, frames);
                if let Some(stale) = slots.job.replace(job) {
                    slots.stats.replaced += 1;
                    self.spare = stale;
                }
                slots.stats.submitted += 1;
                self.shared.wakeup.notify_all();
                delivered
            }
        };

        match delivered {
            Some(Err(err)) => return Err(err),
            Some(Ok(output)) => {
                if let Some(old) = self.latest.replace(output) {
                    if self.spare.is_empty() {
                        self.spare = old;
                    }
                }
            }
            None => {}
        }

        if let Some(latest) = &self.latest {
            if latest.len() != frames.len() {
                return Err(TransformError::ChannelCount {
                    expected: frames.len(),
                    got: latest.len(),
                });
            }
            for (dst, src) in frames.iter_mut().zip(latest) {
                if !dst.copy_pixels_from(src) {
                    dst.clone_from(src);
                }
            }
        }
        Ok(())
    }

    /// Stop and join the worker thread. Waits for at most one transform call.
    pub fn stop(&mut self) {
        if self.state == WorkerState::Stopped {
            return;
        }
        {
            let mut slots = lock(&self.shared.slots);
            slots.running = false;
            slots.job = None;
            self.shared.wakeup.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("transform worker `{}` panicked", self.name);
            }
        }
        self.state = WorkerState::Stopped;
        let stats = self.stats();
        log::debug!(
            "transform worker `{}` stopped: {} submitted, {} completed, {} replaced",
            self.name,
            stats.submitted,
            stats.completed,
            stats.replaced
        );
    }
}

impl Drop for TransformWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn copy_frames(dst: &mut Vec<FrameImage>, src: &[FrameImage]) {
    dst.truncate(src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        d.clone_from(s);
    }
    let have = dst.len();
    dst.extend(src[have..].iter().cloned());
}

fn worker_loop(shared: &Shared, mut transform: Box<dyn FrameTransform>) {
    loop {
        let mut job = {
            let mut slots = lock(&shared.slots);
            loop {
                if !slots.running {
                    return;
                }
                if let Some(job) = slots.job.take() {
                    break job;
                }
                slots = shared
                    .wakeup
                    .wait(slots)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        let result = transform.apply(&mut job).map(|()| job);
        if let Err(err) = &result {
            log::warn!("transform `{}` failed: {err}", transform.name());
        }

        let mut slots = lock(&shared.slots);
        slots.result = Some(result);
        slots.stats.completed += 1;
        shared.wakeup.notify_all();
    }
}
