use thiserror::Error;

pub type CoordResult<T> = Result<T, CoordError>;

/// Failures reported by a coordination backend.
///
/// `NodeExists` and `NoNode` are expected conflicts the admission algorithm
/// resolves inline; every other variant means the session can no longer be
/// trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    #[error("node already exists")]
    NodeExists,
    #[error("node does not exist")]
    NoNode,
    #[error("node has children")]
    NotEmpty,
    #[error("version mismatch")]
    BadVersion,
    #[error("session expired")]
    SessionExpired,
    #[error("connection lost")]
    ConnectionLoss,
    #[error("session is closed")]
    SessionClosed,
    #[error("coordination backend error: {0}")]
    Backend(String),
}

impl CoordError {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            CoordError::NodeExists => "node_exists",
            CoordError::NoNode => "no_node",
            CoordError::NotEmpty => "not_empty",
            CoordError::BadVersion => "bad_version",
            CoordError::SessionExpired => "session_expired",
            CoordError::ConnectionLoss => "connection_loss",
            CoordError::SessionClosed => "session_closed",
            CoordError::Backend(_) => "backend",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("wait failed: {0}")]
    Wait(String),
    #[error("runner failure: {0}")]
    Internal(String),
}

/// Errors that abort `AdmissionController::run` without running the command.
///
/// Coordination failures never show up here; they turn into a fallback run.
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("running command line: {0}")]
    Runner(#[from] RunnerError),
}
