use rowboat_common::error::CommonError;
use rowboat_grid::error::GridError;
use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    /// The interpreter process could not be started, written to, or
    /// supervised. Fatal for the current dispatch; the supervisor drops
    /// the process and starts fresh on the next one.
    #[error("process execution failed: {message}")]
    ProcessExecution {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
    #[error("error in output capture: {0}")]
    Grid(#[from] GridError),
    #[error("error in configuration: {0}")]
    Common(#[from] CommonError),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ExecError {
    pub fn process(message: impl Into<String>) -> Self {
        ExecError::ProcessExecution {
            message: message.into(),
            source: None,
        }
    }

    pub fn process_io(message: impl Into<String>, source: std::io::Error) -> Self {
        ExecError::ProcessExecution {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ExecError::InternalError(message.into())
    }

    /// Whether this error reports a cancelled invocation rather than a
    /// failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ExecError::Grid(GridError::Aborted))
    }
}
