use thiserror::Error;
use zkexec_core::RunnerError;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<ExecError> for RunnerError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Spawn(reason) => RunnerError::Spawn(reason),
            ExecError::Io(reason) => RunnerError::Wait(reason),
        }
    }
}
