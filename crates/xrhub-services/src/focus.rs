use std::sync::Arc;

use xrhub_core::errors::SessionError;
use xrhub_core::ids::SessionId;
use xrhub_core::session_config::Role;
use xrhub_core::topics;
use xrhub_reality::FocusSource;
use xrhub_session::manager::SessionManager;

use crate::arbiter::Arbiter;

/// Decides which session holds input focus. Only the manager may grant
/// focus; the authoritative holder is pushed to every managed session on
/// `ar.focus.state`.
pub struct FocusService {
    manager: Arc<SessionManager>,
    arbiter: Arc<Arbiter<Option<SessionId>>>,
}

impl FocusService {
    pub fn new(manager: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            arbiter: Arbiter::new("focus", None),
        })
    }

    pub fn focused(&self) -> Option<SessionId> {
        self.arbiter.current()
    }

    pub fn on_change(&self) -> tokio::sync::broadcast::Receiver<Option<SessionId>> {
        self.arbiter.on_change()
    }

    /// Grant focus to a session (or clear it with `None`). Manager only.
    pub fn grant_focus(&self, session_id: Option<SessionId>) -> Result<(), SessionError> {
        self.manager.ensure_manager()?;
        if self.arbiter.set_current(session_id.clone()) {
            tracing::info!(session_id = ?session_id, "focus granted");
            self.push_state();
        }
        Ok(())
    }

    fn push_state(&self) {
        let focused = self.arbiter.current();
        for session in self.manager.managed_sessions() {
            let body = serde_json::json!({
                "focused": focused.as_ref() == Some(&session.id),
            });
            let _ = session.send(topics::FOCUS_STATE, Some(body));
        }
    }

    /// Start the service. When running as manager, focus is granted to the
    /// manager's own session shortly after self-connect. The grant is
    /// deferred a tick so handlers registered synchronously during startup
    /// wiring observe it instead of racing it.
    pub fn attach(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut connects = self.manager.on_managed_connect();
        tokio::spawn(async move {
            if service.manager.port().wait_connected().await.is_err() {
                return;
            }
            if !service.manager.is_reality_manager() {
                return;
            }
            // Wait for the manager's own session to join the managed
            // collection, then grant after a tick so handlers registered
            // during synchronous startup wiring observe the grant.
            loop {
                if service.focused().is_some() {
                    return;
                }
                let own = service
                    .manager
                    .managed_sessions()
                    .into_iter()
                    .find(|s| {
                        s.peer()
                            .map(|peer| peer.configuration.role == Role::Manager)
                            .unwrap_or(false)
                    })
                    .map(|s| s.id.clone());
                if let Some(own) = own {
                    tokio::task::yield_now().await;
                    if service.focused().is_none() {
                        let _ = service.grant_focus(Some(own));
                    }
                    return;
                }
                if connects.recv().await.is_err() {
                    return;
                }
            }
        });

        // Clear focus if its holder closes.
        let service = Arc::clone(self);
        let mut connects = self.manager.on_managed_connect();
        tokio::spawn(async move {
            while let Ok(session) = connects.recv().await {
                let service = Arc::clone(&service);
                let mut closes = session.on_close();
                let session_id = session.id.clone();
                tokio::spawn(async move {
                    let _ = closes.recv().await;
                    if service.focused().as_ref() == Some(&session_id) {
                        let _ = service.grant_focus(None);
                    }
                });
            }
        });
    }
}

impl FocusSource for FocusService {
    fn focused_session(&self) -> Option<SessionId> {
        self.focused()
    }
}
