use quill_pipeline::PipelineError;
use thiserror::Error;

/// Top-level error type for the quill-extension crate.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExtensionError {
    #[error("failed to spawn extension '{name}': {reason}")]
    Spawn { name: String, reason: String },
    #[error("extension protocol violation: {0}")]
    Protocol(String),
    #[error("extension channel closed")]
    ChannelClosed,
    #[error("extension channel failed: {0}")]
    ChannelFailed(String),
    #[error("extension returned error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("extension does not provide plugin '{0}'")]
    UnknownPlugin(String),
    #[error("plugin '{0}' reported failure")]
    ProcessFailed(String),
    #[error("invalid extension state transition from {from} to {to}")]
    InvalidState { from: String, to: String },
    #[error("request cancelled")]
    Cancelled,
    #[error("io failure: {0}")]
    Io(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl ExtensionError {
    /// Converts into the engine's error type, attributing failures to `plugin`.
    pub fn into_pipeline_error(self, plugin: &str) -> PipelineError {
        match self {
            Self::Cancelled => PipelineError::Cancelled,
            Self::Pipeline(error) => error,
            Self::Protocol(_) | Self::UnknownPlugin(_) => PipelineError::Protocol(self.to_string()),
            other => PipelineError::PluginFailed {
                plugin: plugin.to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<ExtensionError> for PipelineError {
    fn from(error: ExtensionError) -> Self {
        error.into_pipeline_error("extension")
    }
}

impl From<std::io::Error> for ExtensionError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}
