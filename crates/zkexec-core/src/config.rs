use std::time::Duration;

use zkexec_model::{ModelError, NodeLayout, TimeoutMs};

pub const DEFAULT_ENDPOINT: &str = "localhost:2181";
pub const DEFAULT_SESSION_TIMEOUT_MS: TimeoutMs = 5_000;
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(DEFAULT_SESSION_TIMEOUT_MS);

/// Where the coordination service lives and which root node gates the command.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Connection string, e.g. `zk1:2181,zk2:2181,zk3:2181`.
    pub endpoint: String,
    pub session_timeout: Duration,
    /// Path of the control node.
    pub root: String,
}

impl AdmissionConfig {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn layout(&self) -> Result<NodeLayout, ModelError> {
        NodeLayout::new(self.root.clone())
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            root: String::new(),
        }
    }
}
