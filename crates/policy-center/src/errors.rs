use policyd_core_types::CoreError;
use policyd_event_bus::BusError;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PolicyError {
    #[error("canonical source error during {op}: {message}")]
    CanonicalSource { op: String, message: String },
    #[error("evaluation engine error: {0}")]
    Evaluation(String),
    #[error("invalid caller input: {0}")]
    CallerInput(String),
    #[error("patch application failed: {0}")]
    PatchApplication(String),
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("policy data has not been initialized")]
    NotInitialized,
    #[error("invalid policy: {0}")]
    Invalid(String),
    #[error("deadline exceeded before {0}")]
    DeadlineExceeded(String),
    #[error("change notification failed: {0}")]
    Publish(String),
}

/// Coarse classification used by API layers to map errors onto responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    CanonicalSource,
    Evaluation,
    CallerInput,
    PatchApplication,
    NotFound,
    NotInitialized,
    Invalid,
    DeadlineExceeded,
    Publish,
}

impl PolicyError {
    pub fn canonical(op: impl Into<String>, message: impl ToString) -> Self {
        PolicyError::CanonicalSource {
            op: op.into(),
            message: message.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PolicyError::CanonicalSource { .. } => ErrorKind::CanonicalSource,
            PolicyError::Evaluation(_) => ErrorKind::Evaluation,
            PolicyError::CallerInput(_) => ErrorKind::CallerInput,
            PolicyError::PatchApplication(_) => ErrorKind::PatchApplication,
            PolicyError::NotFound(_) => ErrorKind::NotFound,
            PolicyError::NotInitialized => ErrorKind::NotInitialized,
            PolicyError::Invalid(_) => ErrorKind::Invalid,
            PolicyError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            PolicyError::Publish(_) => ErrorKind::Publish,
        }
    }

    pub fn is_caller_input(&self) -> bool {
        self.kind() == ErrorKind::CallerInput
    }
}

impl From<PolicyError> for CoreError {
    fn from(value: PolicyError) -> Self {
        CoreError::new(value.to_string())
    }
}

impl From<BusError> for PolicyError {
    fn from(value: BusError) -> Self {
        PolicyError::Publish(value.to_string())
    }
}
