//! The camera controller: owns a frame source and the rig it feeds.

use std::ops::Deref;
use std::sync::Arc;

use arcam_core::{Flip, Orientation};
use arcam_lifecycle::{Behavior, Controller, ControllerError, Lifecycle};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::rig::TransformFault;
use crate::{lock, FrameSource, SharedRig, SourceError};

/// What one [`Camera::update`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The camera is not started; nothing was captured.
    Idle,
    /// The source had no new frame; `current` is unchanged.
    NoFrame,
    /// A new frame was published and committed as frame number `frame`.
    Committed { frame: u64 },
}

pub struct CameraBehavior {
    source: Box<dyn FrameSource>,
    rig: SharedRig,
    target: Orientation,
    source_name: String,
}

enum CycleError {
    Source(SourceError),
    Transform(TransformFault),
}

impl CameraBehavior {
    fn cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let mut rig = lock(&self.rig);
        let produced = self
            .source
            .capture(rig.next_mut())
            .map_err(CycleError::Source)?;
        if !produced {
            rig.commit();
            return Ok(CycleOutcome::NoFrame);
        }
        let published = rig.publish();
        rig.commit();
        published.map_err(CycleError::Transform)?;
        Ok(CycleOutcome::Committed {
            frame: rig.frames_committed(),
        })
    }
}

impl Behavior for CameraBehavior {
    fn configure(&mut self) -> Result<(), ControllerError> {
        let description = self.source.describe().map_err(|e| {
            ControllerError::external(format!("describing source `{}`", self.source_name), e)
        })?;
        let flip = Flip::between(description.orientation, self.target);
        lock(&self.rig).configure(description.channel_count, description.format, flip)
    }

    fn start(&mut self) -> Result<(), ControllerError> {
        self.source.start().map_err(|e| {
            ControllerError::external(format!("starting source `{}`", self.source_name), e)
        })
    }

    fn stop(&mut self) -> Result<(), ControllerError> {
        self.source.stop().map_err(|e| {
            ControllerError::external(format!("stopping source `{}`", self.source_name), e)
        })
    }
}

/// Camera controller. Dereferences to the underlying [`Controller`].
#[derive(Clone)]
pub struct Camera {
    controller: Arc<Controller<CameraBehavior>>,
    rig: SharedRig,
}

impl Camera {
    /// Camera reading from `source`; frames are flipped into `target`
    /// orientation on publish.
    pub fn new(
        name: impl Into<String>,
        source: Box<dyn FrameSource>,
        target: Orientation,
    ) -> Self {
        let name = name.into();
        let rig = crate::CameraRig::shared();
        let behavior = CameraBehavior {
            source,
            rig: rig.clone(),
            target,
            source_name: name.clone(),
        };
        Self {
            controller: Controller::new(name, behavior),
            rig,
        }
    }

    pub fn rig(&self) -> SharedRig {
        self.rig.clone()
    }

    pub fn controller(&self) -> &Arc<Controller<CameraBehavior>> {
        &self.controller
    }

    /// Handle usable as a dependency of other controllers.
    pub fn handle(&self) -> Arc<dyn Lifecycle> {
        self.controller.clone()
    }

    /// Run one host cycle: capture into `next`, publish, commit.
    ///
    /// A source failure stops the camera (and everything depending on it).
    /// A transform failure stops the controller that owns the transform and
    /// is returned as [`ControllerError::TransformFailure`].
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip(self), fields(name = %self.controller.name()))
    )]
    pub fn update(&self) -> Result<CycleOutcome, ControllerError> {
        let Some(step) = self.controller.with_started(|b| b.cycle()) else {
            return Ok(CycleOutcome::Idle);
        };
        match step {
            Ok(outcome) => Ok(outcome),
            Err(CycleError::Source(err)) => {
                log::error!(
                    "camera `{}` source failed, stopping: {err}",
                    self.controller.name()
                );
                if let Err(stop_err) = self.controller.stop() {
                    log::warn!(
                        "camera `{}` did not stop cleanly: {stop_err}",
                        self.controller.name()
                    );
                }
                Err(ControllerError::external(
                    format!("capturing from `{}`", self.controller.name()),
                    err,
                ))
            }
            Err(CycleError::Transform(fault)) => {
                let owner = fault.owner.upgrade();
                let controller = owner
                    .as_ref()
                    .map(|o| o.name().to_string())
                    .unwrap_or_else(|| fault.name.clone());
                if let Some(owner) = owner.filter(|o| o.is_started()) {
                    log::error!("stopping `{controller}` after its transform failed");
                    if let Err(stop_err) = owner.stop() {
                        log::warn!("`{controller}` did not stop cleanly: {stop_err}");
                    }
                }
                Err(ControllerError::TransformFailure {
                    controller,
                    source: Box::new(fault.error),
                })
            }
        }
    }
}

impl Deref for Camera {
    type Target = Controller<CameraBehavior>;

    fn deref(&self) -> &Self::Target {
        &self.controller
    }
}
