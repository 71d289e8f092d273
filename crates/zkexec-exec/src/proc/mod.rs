use async_trait::async_trait;
use tracing::{debug, trace};

use zkexec_core::{ProcessRunner, RunnerError};
use zkexec_model::CommandLine;

use crate::{
    error::{ExecError, ExecResult},
    util::{cmd_program, exit_code},
};

/// Runs the command as a child process sharing the caller's stdio.
///
/// Nothing is buffered or rewritten: the child reads the caller's stdin and
/// writes straight to its stdout and stderr.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    name: &'static str,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self { name: "proc" }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Spawn `command`, wait for it and return its exit code.
    pub async fn spawn_and_wait(&self, command: &CommandLine) -> ExecResult<i32> {
        let program = command.program();

        trace!(target: "zkexec.exec", runner = self.name, program, args = ?command.args(), "spawn");
        let mut child = cmd_program(program, command.args())
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{program}: {e}")))?;

        let status = child.wait().await?;
        let code = exit_code(status);
        if status.success() {
            debug!(target: "zkexec.exec", runner = self.name, "exit success");
        } else {
            debug!(target: "zkexec.exec", runner = self.name, code, %status, "exit failure");
        }
        Ok(code)
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRunner for CommandRunner {
    async fn run(&self, command: &CommandLine) -> Result<i32, RunnerError> {
        Ok(self.spawn_and_wait(command).await?)
    }
}
