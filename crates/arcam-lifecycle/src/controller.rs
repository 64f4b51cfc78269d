//! The controller state machine and its dependency edges.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::notifier::{ControllerId, LifecycleEvent, LifecycleObserver, Notifier, SubscriptionId};
use crate::{lock, ControllerError, ControllerState, Phase};

/// Component-specific hooks run by a [`Controller`] at each transition.
///
/// Hooks run while the controller's own lock is held. They may query other
/// controllers, but must not drive the lifecycle of their own dependencies.
pub trait Behavior: Send + 'static {
    /// Runs on `configure()`. On error the controller stays unconfigured.
    fn configure(&mut self) -> Result<(), ControllerError> {
        Ok(())
    }

    /// Runs once every dependency is started. On error the controller stays
    /// configured but not ready.
    fn on_ready(&mut self) -> Result<(), ControllerError> {
        Ok(())
    }

    /// Runs on `start()`. On error the controller stays stopped.
    fn start(&mut self) -> Result<(), ControllerError> {
        Ok(())
    }

    /// Runs on `stop()`. The controller is marked stopped even if this fails.
    fn stop(&mut self) -> Result<(), ControllerError> {
        Ok(())
    }
}

/// Object-safe view of a controller, used for dependency edges.
pub trait Lifecycle: Send + Sync {
    fn id(&self) -> ControllerId;
    fn name(&self) -> &str;
    fn state(&self) -> ControllerState;
    fn notifier(&self) -> &Notifier;
    fn configure(&self) -> Result<(), ControllerError>;
    fn start(&self) -> Result<(), ControllerError>;
    fn stop(&self) -> Result<(), ControllerError>;

    fn is_started(&self) -> bool {
        self.state().started
    }

    fn phase(&self) -> Phase {
        self.state().phase()
    }
}

struct DependencyEdge {
    target: Arc<dyn Lifecycle>,
    subscription: SubscriptionId,
}

struct Inner<B> {
    state: ControllerState,
    behavior: B,
    dependencies: Vec<DependencyEdge>,
    waiting: BTreeSet<ControllerId>,
    last_error: Option<String>,
}

/// A component with an explicit configure → ready → start → stop lifecycle.
///
/// Controllers are shared as `Arc<Controller<B>>`. A dependent subscribes to
/// each dependency's [`Notifier`]; a dependency starting may make the
/// dependent ready (and auto-start it), a dependency stopping forces the
/// dependent to stop before the dependency's `stop()` returns.
pub struct Controller<B: Behavior> {
    id: ControllerId,
    name: String,
    auto_start: AtomicBool,
    notifier: Notifier,
    inner: Mutex<Inner<B>>,
}

impl<B: Behavior> Controller<B> {
    pub fn new(name: impl Into<String>, behavior: B) -> Arc<Self> {
        Arc::new(Self::build(name.into(), behavior))
    }

    /// Like [`Controller::new`], for behaviors that need a handle to their own
    /// controller (e.g. to be named as the owner of a frame transform).
    pub fn new_cyclic(
        name: impl Into<String>,
        make: impl FnOnce(Weak<dyn Lifecycle>) -> B,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let owner: Weak<dyn Lifecycle> = weak.clone();
            Self::build(name, make(owner))
        })
    }

    fn build(name: String, behavior: B) -> Self {
        Self {
            id: ControllerId::next(),
            name,
            auto_start: AtomicBool::new(false),
            notifier: Notifier::new(),
            inner: Mutex::new(Inner {
                state: ControllerState::default(),
                behavior,
                dependencies: Vec::new(),
                waiting: BTreeSet::new(),
                last_error: None,
            }),
        }
    }

    /// Builder-style variant of [`Controller::set_auto_start`].
    pub fn with_auto_start(self: Arc<Self>, auto_start: bool) -> Arc<Self> {
        self.set_auto_start(auto_start);
        self
    }

    /// Start automatically as soon as the controller becomes ready.
    pub fn set_auto_start(&self, auto_start: bool) {
        self.auto_start.store(auto_start, Ordering::Release);
    }

    pub fn auto_start(&self) -> bool {
        self.auto_start.load(Ordering::Acquire)
    }

    /// Add `dependency` as a prerequisite for becoming ready.
    ///
    /// A dependency that is already started does not hold readiness back.
    pub fn add_dependency(
        self: &Arc<Self>,
        dependency: Arc<dyn Lifecycle>,
    ) -> Result<(), ControllerError> {
        if dependency.id() == self.id {
            return Err(ControllerError::invalid_argument(format!(
                "controller `{}` cannot depend on itself",
                self.name
            )));
        }
        {
            let inner = lock(&self.inner);
            self.ensure(&inner, "add_dependency", !inner.state.started)?;
            if inner
                .dependencies
                .iter()
                .any(|d| d.target.id() == dependency.id())
            {
                return Ok(());
            }
        }

        // Subscribe before sampling the dependency's state so a concurrent
        // `Started` cannot slip between the two.
        let me = Arc::downgrade(self) as Weak<dyn LifecycleObserver>;
        let subscription = dependency.notifier().subscribe(me);

        let mut inner = lock(&self.inner);
        if inner.state.started {
            dependency.notifier().unsubscribe(subscription);
            return Err(self.invalid_state("add_dependency", inner.state));
        }
        if !dependency.is_started() {
            inner.waiting.insert(dependency.id());
            inner.state.ready = false;
        }
        log::debug!(
            "controller `{}` now depends on `{}`",
            self.name,
            dependency.name()
        );
        inner.dependencies.push(DependencyEdge {
            target: dependency,
            subscription,
        });
        Ok(())
    }

    /// Remove the dependency with the given id. Unknown ids are ignored.
    pub fn remove_dependency(&self, dependency: ControllerId) -> Result<(), ControllerError> {
        let became_unblocked = {
            let mut inner = lock(&self.inner);
            self.ensure(&inner, "remove_dependency", !inner.state.started)?;
            let Some(pos) = inner
                .dependencies
                .iter()
                .position(|d| d.target.id() == dependency)
            else {
                return Ok(());
            };
            let edge = inner.dependencies.remove(pos);
            edge.target.notifier().unsubscribe(edge.subscription);
            inner.waiting.remove(&dependency);
            inner.state.configured && !inner.state.ready && inner.waiting.is_empty()
        };
        if became_unblocked {
            self.become_ready()?;
        }
        Ok(())
    }

    /// Ids of the dependencies, in insertion order.
    pub fn dependencies(&self) -> Vec<ControllerId> {
        lock(&self.inner)
            .dependencies
            .iter()
            .map(|d| d.target.id())
            .collect()
    }

    /// Ids of the dependencies that have not (re)started yet.
    pub fn waiting_on(&self) -> Vec<ControllerId> {
        lock(&self.inner).waiting.iter().copied().collect()
    }

    /// Message of the last error raised by a hook run from an event callback.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner).last_error.clone()
    }

    /// Run `f` with exclusive access to the behavior.
    pub fn with_behavior<R>(&self, f: impl FnOnce(&mut B) -> R) -> R {
        f(&mut lock(&self.inner).behavior)
    }

    /// Run `f` with exclusive access to the behavior, only if started.
    ///
    /// The started check and `f` happen under the same lock, so `f` never
    /// overlaps a stop hook.
    pub fn with_started<R>(&self, f: impl FnOnce(&mut B) -> R) -> Option<R> {
        let mut inner = lock(&self.inner);
        if inner.state.started {
            Some(f(&mut inner.behavior))
        } else {
            None
        }
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(name = %self.name))
    )]
    fn configure_impl(&self) -> Result<(), ControllerError> {
        let ready_now = {
            let mut inner = lock(&self.inner);
            self.ensure(&inner, "configure", inner.state.can_configure())?;
            inner.state.configured = false;
            inner.state.ready = false;
            inner.behavior.configure()?;
            inner.state.configured = true;
            inner.last_error = None;
            inner.waiting.is_empty()
        };
        log::debug!("controller `{}` configured", self.name);
        self.notifier.publish(self.id, LifecycleEvent::Configured);
        if ready_now {
            self.become_ready()?;
        }
        Ok(())
    }

    fn become_ready(&self) -> Result<(), ControllerError> {
        {
            let mut inner = lock(&self.inner);
            if !inner.state.configured || inner.state.ready || !inner.waiting.is_empty() {
                return Ok(());
            }
            inner.behavior.on_ready()?;
            inner.state.ready = true;
        }
        log::debug!("controller `{}` ready", self.name);
        self.notifier.publish(self.id, LifecycleEvent::Ready);
        if self.auto_start() {
            self.start_impl()?;
        }
        Ok(())
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(name = %self.name))
    )]
    fn start_impl(&self) -> Result<(), ControllerError> {
        {
            let mut inner = lock(&self.inner);
            self.ensure(&inner, "start", inner.state.can_start())?;
            inner.behavior.start()?;
            inner.state.started = true;
        }
        log::info!("controller `{}` started", self.name);
        self.notifier.publish(self.id, LifecycleEvent::Started);
        Ok(())
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(name = %self.name))
    )]
    fn stop_impl(&self) -> Result<(), ControllerError> {
        let hook = {
            let mut inner = lock(&self.inner);
            self.ensure(&inner, "stop", inner.state.can_stop())?;
            let hook = inner.behavior.stop();
            inner.state.started = false;
            hook
        };
        log::info!("controller `{}` stopped", self.name);
        self.notifier.publish(self.id, LifecycleEvent::Stopped);
        hook
    }

    fn on_dependency_started(&self, dependency: ControllerId) {
        let unblocked = {
            let mut inner = lock(&self.inner);
            if !inner.waiting.remove(&dependency) {
                return;
            }
            inner.state.configured && !inner.state.ready && inner.waiting.is_empty()
        };
        if unblocked {
            if let Err(err) = self.become_ready() {
                self.record_callback_error("becoming ready", &err);
            }
        }
    }

    fn on_dependency_stopped(&self, dependency: ControllerId) {
        let was_started = {
            let mut inner = lock(&self.inner);
            if !inner.dependencies.iter().any(|d| d.target.id() == dependency) {
                return;
            }
            inner.waiting.insert(dependency);
            inner.state.ready = false;
            inner.state.started
        };
        if was_started {
            log::info!(
                "controller `{}` stops because dependency {dependency} stopped",
                self.name
            );
            if let Err(err) = self.stop_impl() {
                self.record_callback_error("stopping", &err);
            }
        }
    }

    fn record_callback_error(&self, action: &str, err: &ControllerError) {
        let message = err.chain();
        log::error!("controller `{}` failed while {action}: {message}", self.name);
        lock(&self.inner).last_error = Some(message);
    }

    fn ensure(
        &self,
        inner: &Inner<B>,
        operation: &'static str,
        ok: bool,
    ) -> Result<(), ControllerError> {
        if ok {
            Ok(())
        } else {
            Err(self.invalid_state(operation, inner.state))
        }
    }

    fn invalid_state(&self, operation: &'static str, state: ControllerState) -> ControllerError {
        ControllerError::InvalidState {
            controller: self.name.clone(),
            operation,
            state,
        }
    }
}

impl<B: Behavior> Lifecycle for Controller<B> {
    fn id(&self) -> ControllerId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ControllerState {
        lock(&self.inner).state
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn configure(&self) -> Result<(), ControllerError> {
        self.configure_impl()
    }

    fn start(&self) -> Result<(), ControllerError> {
        self.start_impl()
    }

    fn stop(&self) -> Result<(), ControllerError> {
        self.stop_impl()
    }
}

impl<B: Behavior> LifecycleObserver for Controller<B> {
    fn on_lifecycle_event(&self, source: ControllerId, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Started => self.on_dependency_started(source),
            LifecycleEvent::Stopped => self.on_dependency_stopped(source),
            LifecycleEvent::Configured | LifecycleEvent::Ready => {}
        }
    }
}

impl<B: Behavior> Drop for Controller<B> {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        for edge in inner.dependencies.drain(..) {
            edge.target.notifier().unsubscribe(edge.subscription);
        }
        if inner.state.started {
            if let Err(err) = inner.behavior.stop() {
                log::warn!(
                    "controller `{}` failed to stop on drop: {}",
                    self.name,
                    err.chain()
                );
            }
            inner.state.started = false;
            self.notifier.publish(self.id, LifecycleEvent::Stopped);
        }
    }
}

impl<B: Behavior> fmt::Debug for Controller<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("auto_start", &self.auto_start())
            .finish()
    }
}
