use crate::feedback::FeedbackError;
use crate::state::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("run `{0}` not found")]
    NotFound(String),
    #[error("run `{0}` already exists")]
    AlreadyExists(String),
    #[error("run `{run_id}` is {status}, not awaiting feedback")]
    NotAwaitingFeedback { run_id: String, status: String },
    #[error("run `{0}` is already being driven")]
    RunBusy(String),
    #[error("run `{0}` was cancelled")]
    Cancelled(String),
    #[error(transparent)]
    UnsupportedFeedback(#[from] FeedbackError),
    #[error("node `{node}` does not accept feedback")]
    UnexpectedResume { node: NodeId },
    #[error("reporter failed: {message}")]
    Reporter { code: &'static str, message: String },
    #[error("invalid run id `{0}`")]
    InvalidRunId(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NotFound(_) => "RUN_NOT_FOUND",
            WorkflowError::AlreadyExists(_) => "RUN_EXISTS",
            WorkflowError::NotAwaitingFeedback { .. } => "RUN_NOT_AWAITING_FEEDBACK",
            WorkflowError::RunBusy(_) => "RUN_BUSY",
            WorkflowError::Cancelled(_) => "RUN_CANCELLED",
            WorkflowError::UnsupportedFeedback(_) => "FEEDBACK_UNSUPPORTED",
            WorkflowError::UnexpectedResume { .. } => "RESUME_UNEXPECTED",
            WorkflowError::Reporter { code, .. } => *code,
            WorkflowError::InvalidRunId(_) => "RUN_ID_INVALID",
            WorkflowError::Storage(_) => "STORAGE_ERROR",
        }
    }
}
