mod error;
pub use error::{CapacityError, ModelError};

mod capacity;
pub use capacity::Capacity;

mod layout;
pub use layout::{LOCK_NODE, NodeLayout, PROC_NODE, PROCESS_PREFIX};

mod event;
pub use event::{Wake, WatchEvent, WatchKind};

mod command;
pub use command::CommandLine;

mod mode;
pub use mode::CreateMode;

/// Session timeout value in milliseconds.
pub type TimeoutMs = u64;
