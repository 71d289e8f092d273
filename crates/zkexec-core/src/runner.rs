use async_trait::async_trait;
use zkexec_model::CommandLine;

use crate::error::RunnerError;

/// Executes the wrapped command to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Returns the exit code of the command.
    ///
    /// An `Err` means the command could not be run at all; the controller
    /// treats it as fatal.
    async fn run(&self, command: &CommandLine) -> Result<i32, RunnerError>;
}
