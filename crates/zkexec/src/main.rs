use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};
use zkexec_core::{
    AdmissionConfig, AdmissionController, ZkConnector,
    config::{DEFAULT_ENDPOINT, DEFAULT_SESSION_TIMEOUT_MS},
};
use zkexec_exec::CommandRunner;
use zkexec_model::{CommandLine, TimeoutMs};
use zkexec_observe::{LoggerConfig, LoggerFormat, logger_init};

/// Run a command only while fewer than N copies of it run cluster-wide.
///
/// N is read from the data of the root node. When ZooKeeper or the root node
/// is unusable the command runs anyway.
#[derive(Parser, Debug)]
#[command(name = "zkexec", version)]
struct Cli {
    /// ZooKeeper connection string
    #[arg(short = 'z', value_name = "HOSTS", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,
    /// Session timeout in milliseconds
    #[arg(short = 't', value_name = "MS", default_value_t = DEFAULT_SESSION_TIMEOUT_MS)]
    timeout: TimeoutMs,
    /// Root node holding the capacity
    #[arg(short = 'n', value_name = "ROOT")]
    root: String,
    /// Suppress error output
    #[arg(short = 'q')]
    quiet: bool,
    /// Print informational messages and warnings
    #[arg(short = 'v')]
    verbose: bool,
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LoggerFormat,
    /// Command to run, with its arguments
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

impl Cli {
    fn admission(&self) -> AdmissionConfig {
        AdmissionConfig {
            endpoint: self.endpoint.clone(),
            session_timeout: Duration::from_millis(self.timeout),
            root: self.root.clone(),
        }
    }

    fn logger(&self) -> LoggerConfig {
        LoggerConfig::from_flags(self.quiet, self.verbose).with_format(self.log_format)
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let cfg = cli.admission();
    let command = CommandLine::new(cli.command).context("invalid command line")?;
    let runner = CommandRunner::new();

    // An unusable root is a configuration problem like a missing one: run anyway.
    let layout = match cfg.layout() {
        Ok(layout) => layout,
        Err(e) => {
            error!(target: "zkexec", "{e}");
            return Ok(runner.spawn_and_wait(&command).await?);
        }
    };
    debug!(target: "zkexec", endpoint = %cfg.endpoint, root = layout.root(), %command, "starting");

    let controller =
        AdmissionController::new(ZkConnector::from_config(&cfg), runner, layout, command);
    Ok(controller.run().await?)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let quiet = cli.quiet;

    if let Err(e) = logger_init(&cli.logger()) {
        if !quiet {
            eprintln!("zkexec: logger: {e}");
        }
        std::process::exit(1);
    }

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(target: "zkexec", "{e:#}");
            std::process::exit(1);
        }
    }
}
