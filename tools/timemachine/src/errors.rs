use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeMachineError {
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("step {index} ({method}) failed: {reason}")]
    StepExecution {
        index: usize,
        method: String,
        reason: String,
    },
    #[error("no renderable representation: {0}")]
    NoRenderableRepresentation(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cli error: {0}")]
    Cli(String),
}

/// Failure raised by a wrapped object while applying a single step.
///
/// The recorder attaches the step index and method name when it surfaces this
/// as [`TimeMachineError::StepExecution`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StepFailure(pub String);

impl StepFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
