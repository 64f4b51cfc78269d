use crate::ControllerState;

/// Boxed error coming from a collaborator outside this crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors signalled by controllers and their hooks.
#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    /// The operation is not allowed in the controller's current lifecycle state.
    #[error("`{operation}` is not allowed on controller `{controller}` in state {state}")]
    InvalidState {
        controller: String,
        operation: &'static str,
        state: ControllerState,
    },

    /// A configuration value violates a structural invariant.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required collaborator (e.g. stereo extrinsics) is not configured.
    #[error("missing dependency: {0}")]
    MissingDependency(String),

    /// A frame transform failed; raised on the host thread on the cycle after
    /// the failure happened.
    #[error("frame transform owned by `{controller}` failed")]
    TransformFailure {
        controller: String,
        #[source]
        source: BoxError,
    },

    /// A source, backend or sink failed outside a frame transform.
    #[error("{context}")]
    External {
        context: String,
        #[source]
        source: BoxError,
    },
}

impl ControllerError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn missing_dependency(msg: impl Into<String>) -> Self {
        Self::MissingDependency(msg.into())
    }

    pub fn external(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::External {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    /// The message followed by every `source()` cause, joined with `": "`.
    pub fn chain(&self) -> String {
        error_chain(self)
    }
}

/// Render `err` and its causes on one line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(err) = cause {
        let msg = err.to_string();
        if !out.ends_with(&msg) {
            out.push_str(": ");
            out.push_str(&msg);
        }
        cause = err.source();
    }
    out
}
