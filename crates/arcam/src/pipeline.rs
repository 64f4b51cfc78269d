//! Camera → (undistortion) → display chain assembled from a [`PipelineConfig`].

use std::sync::Arc;

use arcam_camera::{
    Camera, CycleOutcome, Display, FrameSink, MemorySink, PatternSource, Undistortion,
};
use arcam_core::{NumericBackend, ReferenceBackend};
use arcam_lifecycle::Lifecycle;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{PipelineConfig, PipelineError, SinkConfig};

/// Counters reported by [`Pipeline::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub cycles: u64,
    /// Frames swapped into the rig's current slot.
    pub committed: u64,
    /// Frames handed to the sink.
    pub presented: u64,
    /// Frames the undistortion worker never got to (latest-wins replacement).
    pub dropped: u64,
}

pub struct Pipeline {
    camera: Camera,
    undistortion: Option<Undistortion>,
    display: Display,
    memory: Option<MemorySink>,
    presented: u64,
}

fn check_config(config: &PipelineConfig) -> Result<(), PipelineError> {
    let camera = &config.camera;
    if camera.channels == 0 {
        return Err(PipelineError::InvalidConfig(
            "camera needs at least one channel".to_string(),
        ));
    }
    if camera.width == 0 || camera.height == 0 {
        return Err(PipelineError::InvalidConfig(format!(
            "camera frame size {}x{} has a zero dimension",
            camera.width, camera.height
        )));
    }
    Ok(())
}

impl Pipeline {
    /// Assemble the controllers with the pure-Rust numeric backend.
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_backend(config, Arc::new(ReferenceBackend::new()))
    }

    pub fn with_backend(
        config: &PipelineConfig,
        backend: Arc<dyn NumericBackend>,
    ) -> Result<Self, PipelineError> {
        check_config(config)?;
        let cam = &config.camera;
        let source = PatternSource::new(cam.channels, cam.format())
            .with_orientation(cam.orientation)
            .with_interval(cam.interval);
        let camera = Camera::new(cam.name.clone(), Box::new(source), cam.target);

        let undistortion = config
            .undistortion
            .as_ref()
            .map(|section| {
                Undistortion::new(
                    section.name.clone(),
                    &camera,
                    backend.clone(),
                    section.parameters.clone(),
                    section.settings,
                )
            })
            .transpose()?;

        let (sink, memory): (Box<dyn FrameSink>, Option<MemorySink>) = match &config.sink {
            SinkConfig::Memory => {
                let memory = MemorySink::new();
                (Box::new(memory.clone()), Some(memory))
            }
            #[cfg(feature = "image")]
            SinkConfig::Png { dir, every } => {
                (Box::new(crate::PngSink::new(dir.clone(), *every)?), None)
            }
        };
        let display = Display::new("display", &camera, sink)?;
        if let Some(undistortion) = &undistortion {
            undistortion.set_auto_start(true);
            display.add_dependency(undistortion.handle())?;
        }
        display.set_auto_start(true);

        Ok(Self {
            camera,
            undistortion,
            display,
            memory,
            presented: 0,
        })
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn undistortion(&self) -> Option<&Undistortion> {
        self.undistortion.as_ref()
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    /// The in-memory sink, if the config selected one.
    pub fn memory_sink(&self) -> Option<&MemorySink> {
        self.memory.as_ref()
    }

    /// Configure every controller and start the camera; the dependents
    /// follow through auto-start.
    pub fn start(&self) -> Result<(), PipelineError> {
        self.display.configure()?;
        if let Some(undistortion) = &self.undistortion {
            undistortion.configure()?;
        }
        self.camera.configure()?;
        self.camera.start()?;

        let dependents = self
            .undistortion
            .iter()
            .map(Undistortion::handle)
            .chain(std::iter::once(self.display.handle()));
        for controller in dependents {
            if !controller.is_started() {
                let reason = self.failure_reason(controller.as_ref());
                return Err(PipelineError::NotStarted {
                    controller: controller.name().to_string(),
                    reason,
                });
            }
        }
        log::info!("pipeline started");
        Ok(())
    }

    fn failure_reason(&self, controller: &dyn Lifecycle) -> String {
        let last_error = if controller.id() == self.display.id() {
            self.display.last_error()
        } else {
            self.undistortion.as_ref().and_then(|u| u.last_error())
        };
        last_error.unwrap_or_else(|| format!("stuck in {:?}", controller.phase()))
    }

    /// One host cycle: camera update, then display refresh.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, PipelineError> {
        let outcome = self.camera.update()?;
        if self.display.refresh()? {
            self.presented += 1;
        }
        Ok(outcome)
    }

    /// Run `cycles` host cycles.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn run(&mut self, cycles: u64) -> Result<RunSummary, PipelineError> {
        for _ in 0..cycles {
            self.run_cycle()?;
        }
        let committed = self
            .camera
            .rig()
            .lock()
            .map(|rig| rig.frames_committed())
            .unwrap_or_default();
        let dropped = self
            .undistortion
            .as_ref()
            .and_then(Undistortion::worker_stats)
            .map_or(0, |s| s.replaced);
        Ok(RunSummary {
            cycles,
            committed,
            presented: self.presented,
            dropped,
        })
    }

    /// Stop the camera (and with it every dependent).
    pub fn shutdown(&self) -> Result<(), PipelineError> {
        if self.camera.is_started() {
            self.camera.stop()?;
            log::info!("pipeline stopped");
        }
        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::warn!("pipeline did not shut down cleanly: {err}");
        }
    }
}
