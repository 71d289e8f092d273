//! # Mailbox for watch notifications.
//!
//! ```text
//! backend event thread ──push──► EventQueue ──wait_for──► reconciliation loop
//! ```
//!
//! ## Rules
//! - `push` never blocks on the consumer and may be called from any thread.
//! - `wait_for` drains everything queued so far on every wake-up and
//!   re-blocks when the batch held nothing the controller cares about.
//! - A notification pushed while nobody waits is not lost: the signal keeps a
//!   permit, so the next `wait_for` re-checks the queue immediately.
use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use tokio::sync::Notify;
use tracing::{debug, trace, warn};
use zkexec_model::{NodeLayout, Wake, WatchEvent};

#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<WatchEvent>>,
    signal: Notify,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer side, called from the backend's notification callback.
    pub fn push(&self, event: WatchEvent) {
        trace!(target: "zkexec.queue", %event, "event received");
        self.lock().push_back(event);
        self.signal.notify_one();
    }

    /// Take every queued event, oldest first.
    pub fn drain(&self) -> Vec<WatchEvent> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Block until a capacity change, a membership change or a lock release
    /// under `layout` shows up.
    pub async fn wait_for(&self, layout: &NodeLayout) -> Wake {
        loop {
            let mut wake = Wake::default();
            for event in self.drain() {
                if layout.classify(&event, &mut wake) {
                    debug!(target: "zkexec.queue", %event, "detected change");
                } else if !event.is_session() {
                    warn!(target: "zkexec.queue", %event, "ignored event");
                }
            }
            if wake.any() {
                return wake;
            }

            debug!(target: "zkexec.queue", "waiting notifications");
            self.signal.notified().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<WatchEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use zkexec_model::WatchKind;

    use super::*;

    fn layout() -> NodeLayout {
        NodeLayout::new("/gate").unwrap()
    }

    #[test]
    fn drain_preserves_order() {
        let queue = EventQueue::new();
        queue.push(WatchEvent::session());
        queue.push(WatchEvent::new(WatchKind::NodeDataChanged, "/gate"));
        assert_eq!(queue.len(), 2);

        let events = queue.drain();
        assert_eq!(events[0], WatchEvent::session());
        assert_eq!(events[1].kind, WatchKind::NodeDataChanged);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn returns_immediately_when_relevant_event_is_queued() {
        let queue = EventQueue::new();
        queue.push(WatchEvent::session());
        queue.push(WatchEvent::new(WatchKind::NodeChildrenChanged, "/gate/proc"));

        let wake = queue.wait_for(&layout()).await;
        assert!(wake.membership_changed);
        assert!(!wake.capacity_changed);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn merges_a_whole_batch() {
        let queue = EventQueue::new();
        queue.push(WatchEvent::new(WatchKind::NodeChildrenChanged, "/gate/proc"));
        queue.push(WatchEvent::new(WatchKind::NodeDataChanged, "/gate"));

        let wake = queue.wait_for(&layout()).await;
        assert!(wake.membership_changed && wake.capacity_changed);
    }

    #[tokio::test]
    async fn irrelevant_events_keep_waiting() {
        let queue = Arc::new(EventQueue::new());
        queue.push(WatchEvent::session());
        queue.push(WatchEvent::new(WatchKind::NodeCreated, "/gate/lock"));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.wait_for(&layout()).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        queue.push(WatchEvent::new(WatchKind::NodeDataChanged, "/other"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        queue.push(WatchEvent::new(WatchKind::NodeDataChanged, "/gate"));
        let wake = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should wake up")
            .unwrap();
        assert!(wake.capacity_changed);
    }

    #[tokio::test]
    async fn push_from_foreign_thread_wakes_consumer() {
        let queue = Arc::new(EventQueue::new());
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                queue.push(WatchEvent::new(WatchKind::NodeChildrenChanged, "/gate/proc"));
            })
        };

        let wake = tokio::time::timeout(Duration::from_secs(5), queue.wait_for(&layout()))
            .await
            .expect("consumer should wake up");
        assert!(wake.membership_changed);
        producer.join().unwrap();
    }
}
