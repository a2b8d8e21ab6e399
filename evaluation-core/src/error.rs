use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("{0} is missing")]
    IsMissing(&'static str),

    #[error("control not available")]
    ControlNotAvailable,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("upstream: {0}")]
    Upstream(String),

    #[error("evaluation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EvaluationError {
    /// Errors caused by the caller's input; these are reported back verbatim.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::IsMissing(_)
                | Self::NotFound(_)
                | Self::InvalidArgument(_)
                | Self::AlreadyExists(_)
                | Self::FailedPrecondition(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EvaluationError>;
