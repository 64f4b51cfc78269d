//! Lifecycle flags and the phase derived from them.

use std::fmt;

/// Coarse lifecycle phase derived from [`ControllerState`].
///
/// Configuration runs under the controller lock, so the transient
/// "configuring" step is never observable from outside and has no phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Not configured (initial).
    Stopped,
    /// Configured, still waiting for at least one dependency to start.
    Configured,
    /// Configured and every dependency is started.
    Ready,
    /// Running.
    Started,
}

impl Phase {
    pub fn description(&self) -> &'static str {
        match self {
            Phase::Stopped => "Stopped",
            Phase::Configured => "Configured",
            Phase::Ready => "Ready",
            Phase::Started => "Started",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Snapshot of the three lifecycle flags of a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ControllerState {
    pub configured: bool,
    pub ready: bool,
    pub started: bool,
}

impl ControllerState {
    #[inline]
    pub fn is_stopped(&self) -> bool {
        !self.started
    }

    #[inline]
    pub fn can_configure(&self) -> bool {
        !self.started
    }

    #[inline]
    pub fn can_start(&self) -> bool {
        self.configured && self.ready && !self.started
    }

    #[inline]
    pub fn can_stop(&self) -> bool {
        self.configured && self.started
    }

    pub fn phase(&self) -> Phase {
        match (self.configured, self.ready, self.started) {
            (_, _, true) => Phase::Started,
            (true, true, false) => Phase::Ready,
            (true, false, false) => Phase::Configured,
            (false, _, false) => Phase::Stopped,
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (configured={}, ready={}, started={})",
            self.phase(),
            self.configured,
            self.ready,
            self.started
        )
    }
}
