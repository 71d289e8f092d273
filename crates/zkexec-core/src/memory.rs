//! In-process coordination backend.
//!
//! [`MemoryEnsemble`] keeps a single node tree shared by every session opened
//! through it, with the semantics the admission algorithm relies on:
//! atomic create-if-absent, ephemeral nodes removed on session close,
//! sequential naming, and one-shot data/children watches delivered to the
//! session's [`EventQueue`].
//!
//! Used by the test-suite and for dry runs without a ZooKeeper ensemble.
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tracing::{debug, trace};
use zkexec_model::{CreateMode, WatchEvent, WatchKind};

use crate::{
    coord::{Connect, CoordinationClient},
    error::{CoordError, CoordResult},
    queue::EventQueue,
};

/// ACL entry of the memory backend, `scheme:id:perms`.
pub type MemoryAcl = String;

pub const OPEN_ACL: &str = "world:anyone:cdrwa";

pub type SessionId = u64;

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    acl: Vec<MemoryAcl>,
    version: i32,
    /// Owning session for ephemeral nodes.
    owner: Option<SessionId>,
    /// Next suffix handed out to a sequential child.
    next_seq: u32,
    data_watchers: BTreeSet<SessionId>,
    child_watchers: BTreeSet<SessionId>,
}

impl Node {
    fn new(data: Vec<u8>, acl: Vec<MemoryAcl>, owner: Option<SessionId>) -> Self {
        Self {
            data,
            acl,
            version: 0,
            owner,
            next_seq: 0,
            data_watchers: BTreeSet::new(),
            child_watchers: BTreeSet::new(),
        }
    }
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<SessionId, Arc<EventQueue>>,
    next_session: SessionId,
    available: bool,
}

/// Notifications collected under the tree lock, delivered after it is released.
type Outbox = Vec<(Arc<EventQueue>, WatchEvent)>;

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::new(Vec::new(), open_acl(), None));
        Self {
            nodes,
            sessions: HashMap::new(),
            next_session: 1,
            available: true,
        }
    }

    fn check_session(&self, session: SessionId) -> CoordResult<()> {
        if !self.available {
            return Err(CoordError::ConnectionLoss);
        }
        if !self.sessions.contains_key(&session) {
            return Err(CoordError::SessionClosed);
        }
        Ok(())
    }

    fn notify(
        &self,
        watchers: BTreeSet<SessionId>,
        kind: WatchKind,
        path: &str,
        outbox: &mut Outbox,
    ) {
        for session in watchers {
            if let Some(queue) = self.sessions.get(&session) {
                outbox.push((Arc::clone(queue), WatchEvent::new(kind, path)));
            }
        }
    }

    fn create(
        &mut self,
        owner: Option<SessionId>,
        path: &str,
        data: &[u8],
        acl: &[MemoryAcl],
        mode: CreateMode,
        outbox: &mut Outbox,
    ) -> CoordResult<String> {
        validate_path(path, mode.is_sequential())?;
        let parent_path = parent_of(path);
        let parent = self.nodes.get_mut(parent_path).ok_or(CoordError::NoNode)?;
        if parent.owner.is_some() {
            return Err(CoordError::Backend(format!(
                "ephemeral node {parent_path} cannot have children"
            )));
        }

        let path = if mode.is_sequential() {
            let seq = parent.next_seq;
            parent.next_seq += 1;
            format!("{path}{seq:010}")
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&path) {
            return Err(CoordError::NodeExists);
        }

        let owner = if mode.is_ephemeral() { owner } else { None };
        let acl = if acl.is_empty() { open_acl() } else { acl.to_vec() };
        self.nodes
            .insert(path.clone(), Node::new(data.to_vec(), acl, owner));

        if let Some(parent) = self.nodes.get_mut(parent_path) {
            let watchers = std::mem::take(&mut parent.child_watchers);
            self.notify(watchers, WatchKind::NodeChildrenChanged, parent_path, outbox);
        }
        trace!(target: "zkexec.memory", %path, ?mode, "created");
        Ok(path)
    }

    fn delete(&mut self, path: &str, version: Option<i32>, outbox: &mut Outbox) -> CoordResult<()> {
        let node = self.nodes.get(path).ok_or(CoordError::NoNode)?;
        if let Some(expected) = version
            && expected != node.version
        {
            return Err(CoordError::BadVersion);
        }
        if !self.children_of(path).is_empty() {
            return Err(CoordError::NotEmpty);
        }

        let Some(node) = self.nodes.remove(path) else {
            return Err(CoordError::NoNode);
        };
        let mut watchers = node.data_watchers;
        watchers.extend(node.child_watchers);
        self.notify(watchers, WatchKind::NodeDeleted, path, outbox);

        let parent_path = parent_of(path);
        if let Some(parent) = self.nodes.get_mut(parent_path) {
            let watchers = std::mem::take(&mut parent.child_watchers);
            self.notify(watchers, WatchKind::NodeChildrenChanged, parent_path, outbox);
        }
        trace!(target: "zkexec.memory", %path, "deleted");
        Ok(())
    }

    fn set_data(&mut self, path: &str, data: &[u8], outbox: &mut Outbox) -> CoordResult<()> {
        let node = self.nodes.get_mut(path).ok_or(CoordError::NoNode)?;
        node.data = data.to_vec();
        node.version += 1;
        let watchers = std::mem::take(&mut node.data_watchers);
        self.notify(watchers, WatchKind::NodeDataChanged, path, outbox);
        Ok(())
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, _)| {
                let name = &p[prefix.len()..];
                (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
            })
            .collect()
    }

    fn close(&mut self, session: SessionId, outbox: &mut Outbox) {
        self.sessions.remove(&session);
        for node in self.nodes.values_mut() {
            node.data_watchers.remove(&session);
            node.child_watchers.remove(&session);
        }

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            let _ = self.delete(&path, None, outbox);
        }
    }
}

fn open_acl() -> Vec<MemoryAcl> {
    vec![OPEN_ACL.to_string()]
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn validate_path(path: &str, sequential: bool) -> CoordResult<()> {
    let trailing_ok = sequential || !path.ends_with('/');
    if !path.starts_with('/') || path == "/" || !trailing_ok || path.contains("//") {
        return Err(CoordError::Backend(format!("invalid path {path:?}")));
    }
    Ok(())
}

fn deliver(outbox: Outbox) {
    for (queue, event) in outbox {
        queue.push(event);
    }
}

/// Shared in-memory node tree; cloning yields another handle to the same tree.
#[derive(Debug, Clone)]
pub struct MemoryEnsemble {
    tree: Arc<Mutex<Tree>>,
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_tree<T>(&self, op: impl FnOnce(&mut Tree, &mut Outbox) -> CoordResult<T>) -> CoordResult<T> {
        let mut outbox = Outbox::new();
        let result = {
            let mut tree = self.lock();
            op(&mut tree, &mut outbox)
        };
        deliver(outbox);
        result
    }

    /// Create a persistent node outside of any session.
    pub fn create_persistent(&self, path: &str, data: &[u8]) -> CoordResult<()> {
        self.with_tree(|tree, outbox| {
            tree.create(None, path, data, &[], CreateMode::Persistent, outbox)
                .map(|_| ())
        })
    }

    /// Overwrite node data, firing data watches.
    pub fn set_data(&self, path: &str, data: &[u8]) -> CoordResult<()> {
        self.with_tree(|tree, outbox| tree.set_data(path, data, outbox))
    }

    /// Delete a node outside of any session.
    pub fn delete(&self, path: &str) -> CoordResult<()> {
        self.with_tree(|tree, outbox| tree.delete(path, None, outbox))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.lock().nodes.contains_key(path)
    }

    /// Child names of `path`, sorted.
    pub fn children(&self, path: &str) -> CoordResult<Vec<String>> {
        let tree = self.lock();
        if !tree.nodes.contains_key(path) {
            return Err(CoordError::NoNode);
        }
        Ok(tree.children_of(path))
    }

    /// Number of sessions currently open.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Simulate a network partition: every call fails with `ConnectionLoss`
    /// until availability is restored.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Expire a session as the service would after its timeout.
    pub fn expire(&self, session: SessionId) {
        let mut outbox = Outbox::new();
        {
            let mut tree = self.lock();
            let queue = tree.sessions.get(&session).cloned();
            tree.close(session, &mut outbox);
            if let Some(queue) = queue {
                outbox.push((queue, WatchEvent::session_lost()));
            }
        }
        deliver(outbox);
        debug!(target: "zkexec.memory", session, "session expired");
    }
}

#[async_trait]
impl Connect for MemoryEnsemble {
    type Client = MemoryClient;

    async fn connect(&self, events: Arc<EventQueue>) -> CoordResult<MemoryClient> {
        let session = {
            let mut tree = self.lock();
            if !tree.available {
                return Err(CoordError::ConnectionLoss);
            }
            let session = tree.next_session;
            tree.next_session += 1;
            tree.sessions.insert(session, Arc::clone(&events));
            session
        };
        events.push(WatchEvent::session());
        debug!(target: "zkexec.memory", session, "session opened");

        Ok(MemoryClient {
            ensemble: self.clone(),
            session,
        })
    }
}

/// Session handle on a [`MemoryEnsemble`].
#[derive(Debug, Clone)]
pub struct MemoryClient {
    ensemble: MemoryEnsemble,
    session: SessionId,
}

impl MemoryClient {
    pub fn session_id(&self) -> SessionId {
        self.session
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    type Acl = MemoryAcl;

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[MemoryAcl],
        mode: CreateMode,
    ) -> CoordResult<String> {
        let session = self.session;
        self.ensemble.with_tree(|tree, outbox| {
            tree.check_session(session)?;
            tree.create(Some(session), path, data, acl, mode, outbox)
        })
    }

    async fn get_data(&self, path: &str, watch: bool) -> CoordResult<Vec<u8>> {
        let mut tree = self.ensemble.lock();
        tree.check_session(self.session)?;
        let node = tree.nodes.get_mut(path).ok_or(CoordError::NoNode)?;
        if watch {
            node.data_watchers.insert(self.session);
        }
        Ok(node.data.clone())
    }

    async fn get_children(&self, path: &str, watch: bool) -> CoordResult<Vec<String>> {
        let mut tree = self.ensemble.lock();
        tree.check_session(self.session)?;
        let children = tree.children_of(path);
        let node = tree.nodes.get_mut(path).ok_or(CoordError::NoNode)?;
        if watch {
            node.child_watchers.insert(self.session);
        }
        Ok(children)
    }

    async fn get_acl(&self, path: &str) -> CoordResult<Vec<MemoryAcl>> {
        let tree = self.ensemble.lock();
        tree.check_session(self.session)?;
        tree.nodes
            .get(path)
            .map(|node| node.acl.clone())
            .ok_or(CoordError::NoNode)
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> CoordResult<()> {
        let session = self.session;
        self.ensemble.with_tree(|tree, outbox| {
            tree.check_session(session)?;
            tree.delete(path, version, outbox)
        })
    }

    async fn close(&self) -> CoordResult<()> {
        let session = self.session;
        self.ensemble.with_tree(|tree, outbox| {
            if !tree.sessions.contains_key(&session) {
                return Ok(());
            }
            tree.close(session, outbox);
            Ok(())
        })?;
        debug!(target: "zkexec.memory", session, "session closed");
        Ok(())
    }
}
