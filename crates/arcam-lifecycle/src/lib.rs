//! Controller lifecycle state machine with dependency propagation.
//!
//! A [`Controller`] moves through `Stopped → Configured → Ready → Started`
//! and back to `Stopped`. Controllers form a dependency graph without any
//! central orchestrator: each dependent subscribes to its dependencies'
//! [`Notifier`], becomes ready when all of them are started, and is stopped
//! synchronously when any of them stops.
//!
//! ## Quickstart
//!
//! ```
//! use arcam_lifecycle::{Behavior, Controller, Lifecycle};
//!
//! struct Noop;
//! impl Behavior for Noop {}
//!
//! let camera = Controller::new("camera", Noop);
//! let display = Controller::new("display", Noop).with_auto_start(true);
//! display.add_dependency(camera.clone()).unwrap();
//!
//! display.configure().unwrap();
//! camera.configure().unwrap();
//! camera.start().unwrap();
//! assert!(display.is_started());
//!
//! camera.stop().unwrap();
//! assert!(!display.is_started());
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

mod controller;
mod error;
mod notifier;
mod state;

pub use controller::{Behavior, Controller, Lifecycle};
pub use error::{error_chain, BoxError, ControllerError};
pub use notifier::{ControllerId, LifecycleEvent, LifecycleObserver, Notifier, SubscriptionId};
pub use state::{ControllerState, Phase};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
