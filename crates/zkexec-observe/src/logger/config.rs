use std::io::IsTerminal;

use crate::logger::format::LoggerFormat;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
    /// Drop `ERROR` records regardless of `level`.
    pub suppress_errors: bool,
}

impl LoggerConfig {
    /// Map the command line switches: errors only by default, `verbose` adds
    /// info and warnings, `quiet` silences errors.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        Self {
            level: if verbose { "info" } else { "error" }.to_string(),
            suppress_errors: quiet,
            ..Self::default()
        }
    }

    pub fn with_format(mut self, format: LoggerFormat) -> Self {
        self.format = format;
        self
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || std::io::stderr().is_terminal();
        Self {
            format: LoggerFormat::Text,
            level: "error".to_string(),
            with_targets: true,
            use_color,
            suppress_errors: false,
        }
    }
}
