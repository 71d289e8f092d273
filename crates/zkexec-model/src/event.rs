use std::fmt;

/// Kind of a watch notification delivered by the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Session state change (connected, disconnected); carries no path.
    None,
    /// The session is gone for good (expired, closed, authentication failed).
    /// Every watch and ephemeral node of the session is lost with it.
    SessionLost,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    /// Anything else a backend may report (watch removal and the like).
    Other,
}

impl WatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchKind::None => "none",
            WatchKind::SessionLost => "session_lost",
            WatchKind::NodeCreated => "node_created",
            WatchKind::NodeDeleted => "node_deleted",
            WatchKind::NodeDataChanged => "node_data_changed",
            WatchKind::NodeChildrenChanged => "node_children_changed",
            WatchKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchKind,
    pub path: Option<String>,
}

impl WatchEvent {
    pub fn new(kind: WatchKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
        }
    }

    /// Session-level notification without a node path.
    pub fn session() -> Self {
        Self {
            kind: WatchKind::None,
            path: None,
        }
    }

    pub fn session_lost() -> Self {
        Self {
            kind: WatchKind::SessionLost,
            path: None,
        }
    }

    /// `true` for session-level notifications of any kind.
    #[inline]
    pub fn is_session(&self) -> bool {
        self.path.is_none() && matches!(self.kind, WatchKind::None | WatchKind::SessionLost)
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} {}", self.kind.as_str(), path),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

/// What woke the controller up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Wake {
    /// Data of the control node changed; capacity must be re-read.
    pub capacity_changed: bool,
    /// Children of the reservation container changed.
    pub membership_changed: bool,
    /// The lock node another instance held has been deleted.
    pub lock_released: bool,
    /// The session expired or was closed underneath the controller.
    pub session_lost: bool,
}

impl Wake {
    #[inline]
    pub fn any(&self) -> bool {
        self.capacity_changed || self.membership_changed || self.lock_released || self.session_lost
    }
}
