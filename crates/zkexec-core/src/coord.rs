//! Contract between the admission algorithm and a coordination backend.
//!
//! Any ZooKeeper-class service works as long as it offers hierarchical nodes,
//! atomic create-if-absent, ephemeral nodes bound to the session, one-shot
//! watches and per-node ACLs.
use std::sync::Arc;

use async_trait::async_trait;
use zkexec_model::CreateMode;

use crate::{error::CoordResult, queue::EventQueue};

/// An open session.
///
/// Watches armed through `get_data`/`get_children` are delivered to the
/// [`EventQueue`] registered at connect time.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Access control entry type; the controller copies it around without looking inside.
    type Acl: Clone + Send + Sync + 'static;

    /// Create a node and return its final path (differs from `path` for sequential modes).
    ///
    /// Fails with `NodeExists` or, when the parent is missing, `NoNode`.
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Self::Acl],
        mode: CreateMode,
    ) -> CoordResult<String>;

    async fn get_data(&self, path: &str, watch: bool) -> CoordResult<Vec<u8>>;

    async fn get_children(&self, path: &str, watch: bool) -> CoordResult<Vec<String>>;

    async fn get_acl(&self, path: &str) -> CoordResult<Vec<Self::Acl>>;

    /// `version = None` deletes regardless of the node version.
    async fn delete(&self, path: &str, version: Option<i32>) -> CoordResult<()>;

    /// End the session; every ephemeral node it created disappears with it.
    async fn close(&self) -> CoordResult<()>;
}

/// Opens sessions against a backend.
#[async_trait]
pub trait Connect: Send + Sync {
    type Client: CoordinationClient;

    async fn connect(&self, events: Arc<EventQueue>) -> CoordResult<Self::Client>;
}
