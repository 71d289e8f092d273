use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid root node path {0:?}: expected an absolute path other than \"/\" without a trailing slash")]
    InvalidRoot(String),
    #[error("empty command line")]
    EmptyCommand,
}

/// Reasons why the control node does not yield a usable capacity.
///
/// None of these abort the program: the controller treats them as a
/// configuration problem and runs the command without admission control.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("znode {0} does not exist")]
    Missing(String),
    #[error("znode {0} has no data")]
    Empty(String),
    #[error("znode {path} has invalid data: {reason}")]
    Invalid { path: String, reason: String },
}
