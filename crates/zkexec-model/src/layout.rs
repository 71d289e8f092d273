use crate::{
    error::ModelError,
    event::{Wake, WatchEvent, WatchKind},
};

/// Name of the mutex node under the root.
pub const LOCK_NODE: &str = "lock";
/// Name of the reservation container under the root.
pub const PROC_NODE: &str = "proc";
/// Prefix of the sequential reservation nodes inside the container.
pub const PROCESS_PREFIX: &str = "process-";

/// Paths of every node the controller touches, derived from the root.
///
/// ```text
/// R                      capacity (data)
/// R/lock                 ephemeral mutex
/// R/proc                 persistent container
/// R/proc/process-NNNN    ephemeral-sequential reservations
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    root: String,
    lock: String,
    proc: String,
    process_prefix: String,
}

impl NodeLayout {
    pub fn new(root: impl Into<String>) -> Result<Self, ModelError> {
        let root = root.into();
        if !root.starts_with('/') || root.len() < 2 || root.ends_with('/') {
            return Err(ModelError::InvalidRoot(root));
        }

        let lock = format!("{root}/{LOCK_NODE}");
        let proc = format!("{root}/{PROC_NODE}");
        let process_prefix = format!("{proc}/{PROCESS_PREFIX}");
        Ok(Self {
            root,
            lock,
            proc,
            process_prefix,
        })
    }

    #[inline]
    pub fn root(&self) -> &str {
        &self.root
    }

    #[inline]
    pub fn lock(&self) -> &str {
        &self.lock
    }

    #[inline]
    pub fn proc(&self) -> &str {
        &self.proc
    }

    /// Path handed to sequential creation; the service appends the counter.
    #[inline]
    pub fn process_prefix(&self) -> &str {
        &self.process_prefix
    }

    /// Fold a single watch notification into `wake`.
    ///
    /// Returns `false` when the event is not one the controller waits for.
    /// A lost session always counts, whatever the path.
    pub fn classify(&self, event: &WatchEvent, wake: &mut Wake) -> bool {
        match (event.kind, event.path.as_deref()) {
            (WatchKind::SessionLost, _) => {
                wake.session_lost = true;
                true
            }
            (WatchKind::NodeDataChanged, Some(path)) if path == self.root => {
                wake.capacity_changed = true;
                true
            }
            (WatchKind::NodeChildrenChanged, Some(path)) if path == self.proc => {
                wake.membership_changed = true;
                true
            }
            (WatchKind::NodeDeleted, Some(path)) if path == self.lock => {
                wake.lock_released = true;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_child_paths() {
        let layout = NodeLayout::new("/batch/reindex").unwrap();
        assert_eq!(layout.root(), "/batch/reindex");
        assert_eq!(layout.lock(), "/batch/reindex/lock");
        assert_eq!(layout.proc(), "/batch/reindex/proc");
        assert_eq!(layout.process_prefix(), "/batch/reindex/proc/process-");
    }

    #[test]
    fn rejects_bad_roots() {
        for root in ["", "/", "relative", "/trailing/"] {
            assert_eq!(
                NodeLayout::new(root),
                Err(ModelError::InvalidRoot(root.to_string())),
                "{root:?}"
            );
        }
    }

    #[test]
    fn classifies_only_watched_paths() {
        let layout = NodeLayout::new("/r").unwrap();
        let mut wake = Wake::default();

        assert!(!layout.classify(&WatchEvent::session(), &mut wake));
        assert!(!layout.classify(
            &WatchEvent::new(WatchKind::NodeDataChanged, "/r/proc"),
            &mut wake
        ));
        assert!(!layout.classify(
            &WatchEvent::new(WatchKind::NodeChildrenChanged, "/r"),
            &mut wake
        ));
        assert!(!layout.classify(&WatchEvent::new(WatchKind::NodeDeleted, "/r"), &mut wake));
        assert!(!wake.any());

        assert!(layout.classify(
            &WatchEvent::new(WatchKind::NodeChildrenChanged, "/r/proc"),
            &mut wake
        ));
        assert!(wake.membership_changed);
        assert!(!wake.capacity_changed);

        assert!(layout.classify(
            &WatchEvent::new(WatchKind::NodeDataChanged, "/r"),
            &mut wake
        ));
        assert!(wake.capacity_changed);
    }

    #[test]
    fn lock_deletion_wakes() {
        let layout = NodeLayout::new("/r").unwrap();
        let mut wake = Wake::default();

        assert!(!layout.classify(&WatchEvent::new(WatchKind::NodeCreated, "/r/lock"), &mut wake));
        assert!(layout.classify(&WatchEvent::new(WatchKind::NodeDeleted, "/r/lock"), &mut wake));
        assert!(wake.lock_released);
        assert!(!wake.capacity_changed && !wake.membership_changed);
    }

    #[test]
    fn lost_session_wakes() {
        let layout = NodeLayout::new("/r").unwrap();
        let mut wake = Wake::default();

        assert!(layout.classify(&WatchEvent::session_lost(), &mut wake));
        assert!(wake.session_lost && wake.any());
        assert!(WatchEvent::session_lost().is_session());
        assert!(!layout.classify(&WatchEvent::session(), &mut Wake::default()));
    }
}
