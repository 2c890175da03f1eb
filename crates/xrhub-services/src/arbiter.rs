use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use xrhub_core::ids::SessionId;
use xrhub_session::port::SessionPort;

/// Shared shape of the auxiliary arbitration services: one manager-held
/// authoritative value, per-session desired values, and a change event
/// that fires only on a real transition.
///
/// Desired entries are removed when their session closes; with no weak
/// references available they would otherwise accumulate in a long-running
/// manager.
pub struct Arbiter<T> {
    name: &'static str,
    current: Mutex<T>,
    desired: Mutex<HashMap<SessionId, T>>,
    watched: Mutex<HashSet<SessionId>>,
    change_tx: broadcast::Sender<T>,
}

impl<T: Clone + PartialEq + Send + 'static> Arbiter<T> {
    pub fn new(name: &'static str, initial: T) -> Arc<Self> {
        let (change_tx, _) = broadcast::channel(32);
        Arc::new(Self {
            name,
            current: Mutex::new(initial),
            desired: Mutex::new(HashMap::new()),
            watched: Mutex::new(HashSet::new()),
            change_tx,
        })
    }

    pub fn current(&self) -> T {
        self.current.lock().clone()
    }

    /// Set the authoritative value. Returns whether it changed; the change
    /// event fires only then, never on a same-value reassignment.
    pub fn set_current(&self, value: T) -> bool {
        {
            let mut current = self.current.lock();
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        tracing::debug!(arbiter = self.name, "value changed");
        let _ = self.change_tx.send(value);
        true
    }

    /// Record a session's desired value. The entry is dropped when the
    /// session closes.
    pub fn set_desired(self: &Arc<Self>, session: &Arc<SessionPort>, value: T) {
        self.desired.lock().insert(session.id.clone(), value);
        if !self.watched.lock().insert(session.id.clone()) {
            return;
        }
        let arbiter = Arc::downgrade(self);
        let session_id = session.id.clone();
        let mut closes = session.on_close();
        tokio::spawn(async move {
            let _ = closes.recv().await;
            if let Some(arbiter) = arbiter.upgrade() {
                arbiter.desired.lock().remove(&session_id);
                arbiter.watched.lock().remove(&session_id);
            }
        });
    }

    pub fn desired_for(&self, session_id: &SessionId) -> Option<T> {
        self.desired.lock().get(session_id).cloned()
    }

    pub fn clear_desired(&self, session_id: &SessionId) {
        self.desired.lock().remove(session_id);
    }

    pub fn on_change(&self) -> broadcast::Receiver<T> {
        self.change_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrhub_core::session_config::{Role, SessionConfiguration};
    use xrhub_session::channel::MessageChannel;

    #[tokio::test]
    async fn change_event_only_on_transition() {
        let arbiter = Arbiter::new("test", 0u32);
        let mut changes = arbiter.on_change();

        assert!(!arbiter.set_current(0));
        assert!(arbiter.set_current(1));
        assert!(!arbiter.set_current(1));
        assert!(arbiter.set_current(2));

        assert_eq!(changes.recv().await.unwrap(), 1);
        assert_eq!(changes.recv().await.unwrap(), 2);
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn desired_removed_when_session_closes() {
        let arbiter = Arbiter::new("test", 0u32);
        let (end_a, end_b) = MessageChannel::pair();
        let a = SessionPort::new("a");
        let b = SessionPort::new("b");
        a.open(end_a, SessionConfiguration::new(Role::Manager))
            .unwrap();
        b.open(end_b, SessionConfiguration::new(Role::Application))
            .unwrap();
        a.wait_connected().await.unwrap();

        arbiter.set_desired(&a, 7);
        assert_eq!(arbiter.desired_for(&a.id), Some(7));

        let mut closes = a.on_close();
        a.close();
        closes.recv().await.unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(arbiter.desired_for(&a.id), None);
    }
}
