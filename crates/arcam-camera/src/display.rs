//! Display controller: hands each committed frame to a sink exactly once.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use arcam_core::FrameImage;
use arcam_lifecycle::{Behavior, Controller, ControllerError, Lifecycle};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{lock, Camera, SharedRig, SinkError};

/// Consumer of committed frames.
pub trait FrameSink: Send {
    /// Present frame number `frame`, one image per channel.
    fn present(&mut self, frame: u64, images: &[FrameImage]) -> Result<(), SinkError>;
}

/// Number of recent frame numbers a [`MemorySink`] remembers.
pub const MEMORY_SINK_HISTORY: usize = 32;

#[derive(Default)]
struct MemoryInner {
    latest: Vec<FrameImage>,
    recent: VecDeque<u64>,
    count: u64,
}

/// Keeps the most recently presented images in memory. Clones share state,
/// so a clone kept by the caller observes what the display presented.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Vec<FrameImage> {
        lock(&self.inner).latest.clone()
    }

    /// The last [`MEMORY_SINK_HISTORY`] presented frame numbers, oldest first.
    pub fn presented(&self) -> Vec<u64> {
        lock(&self.inner).recent.iter().copied().collect()
    }

    pub fn presented_count(&self) -> u64 {
        lock(&self.inner).count
    }
}

impl FrameSink for MemorySink {
    fn present(&mut self, frame: u64, images: &[FrameImage]) -> Result<(), SinkError> {
        let mut inner = lock(&self.inner);
        inner.latest.clear();
        inner.latest.extend_from_slice(images);
        if inner.recent.len() == MEMORY_SINK_HISTORY {
            inner.recent.pop_front();
        }
        inner.recent.push_back(frame);
        inner.count += 1;
        Ok(())
    }
}

pub struct DisplayBehavior {
    rig: SharedRig,
    sink: Box<dyn FrameSink>,
    last_presented: Option<u64>,
}

impl DisplayBehavior {
    fn refresh(&mut self) -> Result<bool, SinkError> {
        let rig = lock(&self.rig);
        let frame = rig.frames_committed();
        if frame == 0 || self.last_presented == Some(frame) {
            return Ok(false);
        }
        self.sink.present(frame, rig.current())?;
        self.last_presented = Some(frame);
        Ok(true)
    }
}

impl Behavior for DisplayBehavior {
    fn start(&mut self) -> Result<(), ControllerError> {
        // Frame counters restart whenever the camera is reconfigured.
        self.last_presented = None;
        Ok(())
    }
}

/// Display controller. Dereferences to the underlying [`Controller`].
#[derive(Clone)]
pub struct Display {
    controller: Arc<Controller<DisplayBehavior>>,
}

impl Display {
    /// Display of `camera`'s committed frames; depends on `camera`.
    pub fn new(
        name: impl Into<String>,
        camera: &Camera,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self, ControllerError> {
        let behavior = DisplayBehavior {
            rig: camera.rig(),
            sink,
            last_presented: None,
        };
        let controller = Controller::new(name, behavior);
        controller.add_dependency(camera.handle())?;
        Ok(Self { controller })
    }

    /// Also wait for `dependency` (e.g. an undistortion controller) before
    /// becoming ready.
    pub fn add_dependency(&self, dependency: Arc<dyn Lifecycle>) -> Result<(), ControllerError> {
        self.controller.add_dependency(dependency)
    }

    pub fn controller(&self) -> &Arc<Controller<DisplayBehavior>> {
        &self.controller
    }

    pub fn handle(&self) -> Arc<dyn Lifecycle> {
        self.controller.clone()
    }

    /// Present the committed frame if it has not been presented yet.
    /// Returns whether something was presented; `false` when not started.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip(self), fields(name = %self.controller.name()))
    )]
    pub fn refresh(&self) -> Result<bool, ControllerError> {
        let Some(presented) = self.controller.with_started(|b| b.refresh()) else {
            return Ok(false);
        };
        presented.map_err(|e| {
            ControllerError::external(format!("presenting on `{}`", self.controller.name()), e)
        })
    }
}

impl Deref for Display {
    type Target = Controller<DisplayBehavior>;

    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}
