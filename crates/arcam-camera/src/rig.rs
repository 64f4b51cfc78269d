//! Double-buffered per-channel frame storage.
//!
//! Every channel owns exactly two images. Within one host cycle the producer
//! writes `next` (through [`CameraRig::next_mut`]), then [`CameraRig::publish`]
//! normalizes orientation and runs the registered transforms on it, and
//! [`CameraRig::commit`] swaps it into `current` if anything was published.
//! Consumers only ever see `current`.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use arcam_core::{Flip, FrameFormat, FrameImage};
use arcam_lifecycle::{ControllerError, Lifecycle};

use crate::TransformError;

/// Per-frame processing hooked into [`CameraRig::publish`].
///
/// Runs synchronously on the host thread with the rig locked, so `apply`
/// must not block on other controllers.
pub trait FrameTransform: Send {
    fn name(&self) -> &str;

    /// Transform all channels of the `next` frame in place.
    fn apply(&mut self, frames: &mut [FrameImage]) -> Result<(), TransformError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransformId(u64);

struct Registration {
    id: TransformId,
    owner: Weak<dyn Lifecycle>,
    transform: Box<dyn FrameTransform>,
}

/// A transform that failed during [`CameraRig::publish`]. The transform has
/// already been unregistered; `owner` is the controller that registered it.
pub struct TransformFault {
    pub id: TransformId,
    pub name: String,
    pub owner: Weak<dyn Lifecycle>,
    pub error: TransformError,
}

impl fmt::Debug for TransformFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformFault")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner.upgrade().map(|o| o.name().to_string()))
            .field("error", &self.error)
            .finish()
    }
}

/// Camera image store shared by the camera controller and its consumers.
#[derive(Default)]
pub struct CameraRig {
    format: Option<FrameFormat>,
    flip: Flip,
    slots: [Vec<FrameImage>; 2],
    current: usize,
    updated: bool,
    published: u64,
    committed: u64,
    transforms: Vec<Registration>,
    next_transform_id: u64,
}

/// The rig as shared between controllers.
pub type SharedRig = Arc<Mutex<CameraRig>>;

impl CameraRig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRig {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Allocate two zeroed images of `format` for each of `channel_count`
    /// channels. Registered transforms are kept; frame counters restart.
    pub fn configure(
        &mut self,
        channel_count: usize,
        format: FrameFormat,
        flip: Flip,
    ) -> Result<(), ControllerError> {
        if channel_count == 0 {
            return Err(ControllerError::invalid_argument(
                "camera rig needs at least one channel",
            ));
        }
        if format.width == 0 || format.height == 0 {
            return Err(ControllerError::invalid_argument(format!(
                "camera rig frame size {}x{} has a zero dimension",
                format.width, format.height
            )));
        }
        if format.byte_len().is_none() {
            return Err(ControllerError::invalid_argument(format!(
                "camera rig frame size {}x{} overflows",
                format.width, format.height
            )));
        }

        self.slots = [
            vec![FrameImage::new(format); channel_count],
            vec![FrameImage::new(format); channel_count],
        ];
        self.format = Some(format);
        self.flip = flip;
        self.current = 0;
        self.updated = false;
        self.published = 0;
        self.committed = 0;
        log::debug!(
            "camera rig configured: {channel_count} x {}x{} {:?}, flip {:?}",
            format.width,
            format.height,
            format.pixel_format,
            flip
        );
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.format.is_some()
    }

    pub fn format(&self) -> Option<FrameFormat> {
        self.format
    }

    pub fn channel_count(&self) -> usize {
        self.slots[0].len()
    }

    pub fn flip(&self) -> Flip {
        self.flip
    }

    /// Last committed frame, one image per channel.
    pub fn current(&self) -> &[FrameImage] {
        &self.slots[self.current]
    }

    /// Frame being produced this cycle. Only the producer writes here.
    pub fn next_mut(&mut self) -> &mut [FrameImage] {
        &mut self.slots[1 - self.current]
    }

    /// Finish the `next` frame: flip it into the target orientation, run the
    /// transforms in registration order, mark the cycle as updated.
    ///
    /// A failing transform is unregistered and returned; the transforms
    /// after it are skipped for this frame.
    pub fn publish(&mut self) -> Result<(), TransformFault> {
        let next = 1 - self.current;
        let frames = &mut self.slots[next];
        if !self.flip.is_identity() {
            for image in frames.iter_mut() {
                image.apply_flip(self.flip);
            }
        }
        self.updated = true;
        self.published += 1;

        let mut failed = None;
        for (i, reg) in self.transforms.iter_mut().enumerate() {
            if let Err(error) = reg.transform.apply(frames) {
                failed = Some((i, error));
                break;
            }
        }
        match failed {
            None => Ok(()),
            Some((i, error)) => {
                let reg = self.transforms.remove(i);
                log::warn!(
                    "frame transform `{}` failed and was removed: {error}",
                    reg.transform.name()
                );
                Err(TransformFault {
                    id: reg.id,
                    name: reg.transform.name().to_string(),
                    owner: reg.owner,
                    error,
                })
            }
        }
    }

    /// Swap `next` into `current` if a frame was published this cycle.
    /// Returns whether the swap happened.
    pub fn commit(&mut self) -> bool {
        if !self.updated {
            return false;
        }
        self.current = 1 - self.current;
        self.updated = false;
        self.committed += 1;
        true
    }

    pub fn frames_published(&self) -> u64 {
        self.published
    }

    /// Number of swaps so far; also the index of the frame in `current`.
    pub fn frames_committed(&self) -> u64 {
        self.committed
    }

    pub fn add_transform(
        &mut self,
        owner: Weak<dyn Lifecycle>,
        transform: Box<dyn FrameTransform>,
    ) -> TransformId {
        let id = TransformId(self.next_transform_id);
        self.next_transform_id += 1;
        log::debug!("frame transform `{}` registered", transform.name());
        self.transforms.push(Registration {
            id,
            owner,
            transform,
        });
        id
    }

    /// Unregister a transform and hand it back, so the caller can drop it
    /// after releasing the rig.
    pub fn remove_transform(&mut self, id: TransformId) -> Option<Box<dyn FrameTransform>> {
        let pos = self.transforms.iter().position(|r| r.id == id)?;
        let reg = self.transforms.remove(pos);
        log::debug!("frame transform `{}` unregistered", reg.transform.name());
        Some(reg.transform)
    }

    pub fn transform_count(&self) -> usize {
        self.transforms.len()
    }
}

impl fmt::Debug for CameraRig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraRig")
            .field("format", &self.format)
            .field("channels", &self.channel_count())
            .field("flip", &self.flip)
            .field("published", &self.published)
            .field("committed", &self.committed)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}
