use quill_store::StoreError;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("cannot resolve pipeline stage '{reference}' referenced from '{stage}'")]
    UnresolvedStage { stage: String, reference: String },
    #[error("unknown pipeline stage '{0}'")]
    UnknownStage(String),
    #[error("configuration scope '{scope}' is invalid: {reason}")]
    InvalidScope { scope: String, reason: String },
    #[error("pipeline stage '{0}' depends on itself")]
    CyclicStage(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("plugin '{0}' not found")]
    PluginNotFound(String),
    #[error("plugin protocol violation: {0}")]
    Protocol(String),
    #[error("plugin '{plugin}' failed: {message}")]
    PluginFailed { plugin: String, message: String },
    #[error("unknown pipeline node '{0}'")]
    UnknownNode(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("message formatting failed: {0}")]
    Format(String),
    #[error("io failure: {0}")]
    Io(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedStage { .. }
                | Self::UnknownStage(_)
                | Self::InvalidScope { .. }
                | Self::CyclicStage(_)
                | Self::Configuration(_)
        )
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
