use arcam_camera::SinkError;
use arcam_core::ParametersError;
use arcam_lifecycle::ControllerError;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error(transparent)]
    Parameters(#[from] ParametersError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
    #[error("`{controller}` did not start: {reason}")]
    NotStarted { controller: String, reason: String },
}
