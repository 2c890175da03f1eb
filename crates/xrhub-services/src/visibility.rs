use std::sync::Arc;

use xrhub_core::topics;
use xrhub_session::manager::SessionManager;
use xrhub_session::port::SessionPort;

use crate::arbiter::Arbiter;

/// Tracks whether the presented content is visible to the user (the host
/// surface may be hidden or backgrounded). The authoritative flag lives
/// here; sessions may record a desired value, and the current value is
/// pushed on `ar.visibility.state`.
pub struct VisibilityService {
    manager: Arc<SessionManager>,
    arbiter: Arc<Arbiter<bool>>,
}

impl VisibilityService {
    pub fn new(manager: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            arbiter: Arbiter::new("visibility", true),
        })
    }

    pub fn is_visible(&self) -> bool {
        self.arbiter.current()
    }

    pub fn on_change(&self) -> tokio::sync::broadcast::Receiver<bool> {
        self.arbiter.on_change()
    }

    pub fn set_visible(&self, visible: bool) {
        if self.arbiter.set_current(visible) {
            tracing::info!(visible, "visibility changed");
            self.push_state();
        }
    }

    pub fn set_desired(&self, session: &Arc<SessionPort>, visible: bool) {
        self.arbiter.set_desired(session, visible);
    }

    fn push_state(&self) {
        let body = serde_json::json!({ "visible": self.arbiter.current() });
        for session in self.manager.managed_sessions() {
            let _ = session.send(topics::VISIBILITY_STATE, Some(body.clone()));
        }
    }

    /// Newly connecting sessions are told the current state immediately.
    pub fn attach(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut connects = self.manager.on_managed_connect();
        tokio::spawn(async move {
            while let Ok(session) = connects.recv().await {
                let body = serde_json::json!({ "visible": service.is_visible() });
                let _ = session.send(topics::VISIBILITY_STATE, Some(body));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrhub_core::session_config::{Role, SessionConfiguration};
    use xrhub_session::channel::MessageChannel;

    #[tokio::test]
    async fn visible_by_default_and_transitions_once() {
        let manager = SessionManager::new(SessionConfiguration::new(Role::Manager));
        let service = VisibilityService::new(manager);
        assert!(service.is_visible());

        let mut changes = service.on_change();
        service.set_visible(false);
        service.set_visible(false);
        assert!(!changes.recv().await.unwrap());
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn state_pushed_to_new_sessions() {
        let manager = SessionManager::new(SessionConfiguration::new(Role::Manager));
        let service = VisibilityService::new(Arc::clone(&manager));
        service.set_visible(false);
        service.attach();
        let mut connects = manager.on_managed_connect();

        let hub_port = manager.add_managed_session_port("app").unwrap();
        let (hub_end, app_end) = MessageChannel::pair();
        let app = SessionPort::new("app-local");

        let (state_tx, mut state_rx) = tokio::sync::mpsc::unbounded_channel();
        app.on(topics::VISIBILITY_STATE, move |body| {
            let tx = state_tx.clone();
            async move {
                let _ = tx.send(body);
                Ok(None)
            }
        });

        hub_port
            .open(hub_end, SessionConfiguration::new(Role::Manager))
            .unwrap();
        app.open(app_end, SessionConfiguration::new(Role::Application))
            .unwrap();
        connects.recv().await.unwrap();

        let state = state_rx.recv().await.unwrap().unwrap();
        assert_eq!(state["visible"], serde_json::json!(false));
    }
}
