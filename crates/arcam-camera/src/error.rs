use arcam_core::{FrameFormat, NumericError};

/// Failure of a per-frame transform.
#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error(transparent)]
    Numeric(#[from] NumericError),
    #[error("transform expects {expected} channels, frame has {got}")]
    ChannelCount { expected: usize, got: usize },
    #[error("transform worker is not running")]
    WorkerStopped,
    #[error("transform worker could not be spawned")]
    Spawn(#[source] std::io::Error),
    #[error("{0}")]
    Failed(String),
}

/// Failure of a frame source.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("source is not started")]
    NotStarted,
    #[error("source produced {got} channels, rig expects {expected}")]
    ChannelCount { expected: usize, got: usize },
    #[error("channel {channel}: frame format {got:?} does not match {expected:?}")]
    FormatMismatch {
        channel: usize,
        expected: FrameFormat,
        got: FrameFormat,
    },
    #[error("source disconnected: {0}")]
    Disconnected(String),
}

/// Failure of a frame sink.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to encode channel {channel}: {reason}")]
    Encode { channel: usize, reason: String },
}
