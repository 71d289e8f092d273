pub mod error;
pub use error::{AdmissionError, CoordError, CoordResult, RunnerError};

pub mod config;
pub use config::AdmissionConfig;

pub mod coord;
pub use coord::{Connect, CoordinationClient};

pub mod queue;
pub use queue::EventQueue;

pub mod runner;
pub use runner::ProcessRunner;

pub mod admission;
pub use admission::{AdmissionController, FallbackReason, Phase, Reconciler};

pub mod memory;
pub use memory::{MemoryClient, MemoryEnsemble};

#[cfg(feature = "zookeeper")]
pub mod zk;
#[cfg(feature = "zookeeper")]
pub use zk::{ZkClient, ZkConnector};
