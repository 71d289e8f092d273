//! ZooKeeper backend.
//!
//! The `zookeeper` client is blocking; every call is moved onto tokio's
//! blocking pool so the reconciliation loop never stalls the runtime.
//! Watch notifications arrive on the client's own event thread and are pushed
//! straight into the session's [`EventQueue`].
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;
use zkexec_model::{CreateMode, WatchEvent, WatchKind};
use zookeeper::{Acl, KeeperState, WatchedEvent, WatchedEventType, ZkError, ZkState, ZooKeeper};

use crate::{
    config::AdmissionConfig,
    coord::{Connect, CoordinationClient},
    error::{CoordError, CoordResult},
    queue::EventQueue,
};

impl From<ZkError> for CoordError {
    fn from(e: ZkError) -> Self {
        match e {
            ZkError::NodeExists => CoordError::NodeExists,
            ZkError::NoNode => CoordError::NoNode,
            ZkError::NotEmpty => CoordError::NotEmpty,
            ZkError::BadVersion => CoordError::BadVersion,
            ZkError::SessionExpired => CoordError::SessionExpired,
            ZkError::ConnectionLoss => CoordError::ConnectionLoss,
            other => CoordError::Backend(format!("{other:?}")),
        }
    }
}

fn to_watch_event(event: WatchedEvent) -> WatchEvent {
    if matches!(event.keeper_state, KeeperState::Expired | KeeperState::AuthFailed) {
        return WatchEvent::session_lost();
    }
    let kind = match event.event_type {
        WatchedEventType::None => WatchKind::None,
        WatchedEventType::NodeCreated => WatchKind::NodeCreated,
        WatchedEventType::NodeDeleted => WatchKind::NodeDeleted,
        WatchedEventType::NodeDataChanged => WatchKind::NodeDataChanged,
        WatchedEventType::NodeChildrenChanged => WatchKind::NodeChildrenChanged,
        #[allow(unreachable_patterns)]
        _ => WatchKind::Other,
    };
    WatchEvent {
        kind,
        path: event.path,
    }
}

fn is_terminal(state: ZkState) -> bool {
    matches!(state, ZkState::Closed | ZkState::AuthFailed)
}

fn to_zk_mode(mode: CreateMode) -> zookeeper::CreateMode {
    match mode {
        CreateMode::Persistent => zookeeper::CreateMode::Persistent,
        CreateMode::PersistentSequential => zookeeper::CreateMode::PersistentSequential,
        CreateMode::Ephemeral => zookeeper::CreateMode::Ephemeral,
        CreateMode::EphemeralSequential => zookeeper::CreateMode::EphemeralSequential,
    }
}

/// Opens ZooKeeper sessions.
#[derive(Debug, Clone)]
pub struct ZkConnector {
    endpoint: String,
    session_timeout: Duration,
}

impl ZkConnector {
    pub fn new(endpoint: impl Into<String>, session_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            session_timeout,
        }
    }

    pub fn from_config(cfg: &AdmissionConfig) -> Self {
        Self::new(cfg.endpoint.clone(), cfg.session_timeout)
    }
}

#[async_trait]
impl Connect for ZkConnector {
    type Client = ZkClient;

    async fn connect(&self, events: Arc<EventQueue>) -> CoordResult<ZkClient> {
        let endpoint = self.endpoint.clone();
        let timeout = self.session_timeout;
        debug!(target: "zkexec.zk", %endpoint, ?timeout, "connecting");

        let watcher_events = Arc::clone(&events);
        let zk = tokio::task::spawn_blocking(move || {
            ZooKeeper::connect(&endpoint, timeout, move |event: WatchedEvent| {
                watcher_events.push(to_watch_event(event))
            })
        })
        .await
        .map_err(|e| CoordError::Backend(format!("connect worker: {e}")))??;

        // Expiry is reported through the state listener as well; both paths
        // feed the same mailbox.
        zk.add_listener(move |state: ZkState| {
            if is_terminal(state) {
                events.push(WatchEvent::session_lost());
            }
        });

        Ok(ZkClient { zk: Arc::new(zk) })
    }
}

/// An open ZooKeeper session.
#[derive(Clone)]
pub struct ZkClient {
    zk: Arc<ZooKeeper>,
}

impl ZkClient {
    async fn blocking<T, F>(&self, op: F) -> CoordResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&ZooKeeper) -> Result<T, ZkError> + Send + 'static,
    {
        let zk = Arc::clone(&self.zk);
        tokio::task::spawn_blocking(move || op(&zk))
            .await
            .map_err(|e| CoordError::Backend(format!("zookeeper worker: {e}")))?
            .map_err(CoordError::from)
    }
}

#[async_trait]
impl CoordinationClient for ZkClient {
    type Acl = Acl;

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> CoordResult<String> {
        let path = path.to_string();
        let data = data.to_vec();
        let acl = acl.to_vec();
        let mode = to_zk_mode(mode);
        self.blocking(move |zk| zk.create(&path, data, acl, mode))
            .await
    }

    async fn get_data(&self, path: &str, watch: bool) -> CoordResult<Vec<u8>> {
        let path = path.to_string();
        self.blocking(move |zk| zk.get_data(&path, watch).map(|(data, _stat)| data))
            .await
    }

    async fn get_children(&self, path: &str, watch: bool) -> CoordResult<Vec<String>> {
        let path = path.to_string();
        self.blocking(move |zk| zk.get_children(&path, watch)).await
    }

    async fn get_acl(&self, path: &str) -> CoordResult<Vec<Acl>> {
        let path = path.to_string();
        self.blocking(move |zk| zk.get_acl(&path).map(|(acl, _stat)| acl))
            .await
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> CoordResult<()> {
        let path = path.to_string();
        self.blocking(move |zk| zk.delete(&path, version)).await
    }

    async fn close(&self) -> CoordResult<()> {
        debug!(target: "zkexec.zk", "closing session");
        self.blocking(|zk| zk.close()).await
    }
}
