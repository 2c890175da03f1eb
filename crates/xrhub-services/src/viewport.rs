use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use xrhub_core::errors::{RemoteError, SessionError};
use xrhub_core::topics;
use xrhub_reality::RealityService;
use xrhub_session::manager::SessionManager;
use xrhub_session::port::SessionPort;

use crate::arbiter::Arbiter;

/// How the presented content occupies the host surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationMode {
    /// Sharing the surface with surrounding content.
    Embedded,
    /// Owning the full surface.
    Immersive,
}

/// Arbitrates the viewport: presentation mode requests from sessions,
/// embedded-viewport bounds pushes, and UI-event forwarding to the
/// presenting viewer.
pub struct ViewportService {
    manager: Arc<SessionManager>,
    arbiter: Arc<Arbiter<PresentationMode>>,
    reality: Mutex<Option<Arc<RealityService>>>,
}

impl ViewportService {
    pub fn new(manager: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            arbiter: Arbiter::new("viewport", PresentationMode::Embedded),
            reality: Mutex::new(None),
        })
    }

    /// UI events forwarded by sessions are routed to this service's
    /// presenting viewer.
    pub fn set_reality_service(&self, reality: Arc<RealityService>) {
        *self.reality.lock() = Some(reality);
    }

    pub fn presentation_mode(&self) -> PresentationMode {
        self.arbiter.current()
    }

    pub fn on_change(&self) -> tokio::sync::broadcast::Receiver<PresentationMode> {
        self.arbiter.on_change()
    }

    pub fn set_presentation_mode(&self, mode: PresentationMode) {
        if self.arbiter.set_current(mode) {
            tracing::info!(mode = ?mode, "presentation mode changed");
            self.push_state();
        }
    }

    /// Push embedded-viewport bounds to every session (only meaningful in
    /// embedded mode; the bounds shape is opaque to the manager).
    pub fn send_embedded_viewport(&self, bounds: serde_json::Value) {
        for session in self.manager.managed_sessions() {
            let _ = session.send(topics::VIEWPORT_EMBEDDED, Some(bounds.clone()));
        }
    }

    fn push_state(&self) {
        let body = serde_json::json!({ "mode": self.arbiter.current() });
        for session in self.manager.managed_sessions() {
            let _ = session.send(topics::VIEWPORT_PRESENTATION_MODE, Some(body.clone()));
        }
    }

    fn forward_uievent(&self, body: Option<serde_json::Value>) {
        let reality = self.reality.lock().clone();
        let Some(reality) = reality else {
            tracing::trace!("ui event dropped, no reality service");
            return;
        };
        let Some(uri) = reality.presenting_uri() else {
            return;
        };
        let session = reality.viewer(&uri).and_then(|viewer| viewer.session());
        if let Some(session) = session {
            let _ = session.send(topics::VIEWPORT_UIEVENT, body);
        }
    }

    pub fn attach(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut connects = self.manager.on_managed_connect();
        tokio::spawn(async move {
            while let Ok(session) = connects.recv().await {
                service.wire_session(session);
            }
        });
    }

    fn wire_session(self: &Arc<Self>, session: Arc<SessionPort>) {
        let service = Arc::clone(self);
        let requester = Arc::clone(&session);
        session.on(topics::VIEWPORT_REQUEST_PRESENTATION_MODE, move |body| {
            let service = Arc::clone(&service);
            let requester = Arc::clone(&requester);
            async move {
                let mode: PresentationMode = body
                    .as_ref()
                    .and_then(|b| b.get("mode"))
                    .and_then(|m| serde_json::from_value(m.clone()).ok())
                    .ok_or_else(|| {
                        SessionError::Remote(RemoteError::new("missing required parameter: mode"))
                    })?;
                service.arbiter.set_desired(&requester, mode);
                service.set_presentation_mode(mode);
                Ok(None)
            }
        });

        let service = Arc::clone(self);
        session.on(topics::VIEWPORT_FORWARD_UIEVENT, move |body| {
            let service = Arc::clone(&service);
            async move {
                service.forward_uievent(body);
                Ok(None)
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrhub_core::ids::SessionId;
    use xrhub_core::session_config::{Role, SessionConfiguration};
    use xrhub_reality::{FocusSource, RealityServiceConfig};
    use xrhub_session::channel::MessageChannel;

    async fn connected_app(
        manager: &Arc<SessionManager>,
    ) -> (Arc<SessionPort>, Arc<SessionPort>) {
        let mut connects = manager.on_managed_connect();
        let hub_port = manager.add_managed_session_port("app").unwrap();
        let (hub_end, app_end) = MessageChannel::pair();
        let app = SessionPort::new("app-local");
        hub_port
            .open(hub_end, SessionConfiguration::new(Role::Manager))
            .unwrap();
        app.open(app_end, SessionConfiguration::new(Role::Application))
            .unwrap();
        let session = connects.recv().await.unwrap();
        (session, app)
    }

    #[tokio::test]
    async fn presentation_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(PresentationMode::Immersive).unwrap(),
            serde_json::json!("immersive")
        );
    }

    #[tokio::test]
    async fn mode_request_over_session_topic() {
        let manager = SessionManager::new(SessionConfiguration::new(Role::Manager));
        let service = ViewportService::new(Arc::clone(&manager));
        service.attach();
        let (_session, app) = connected_app(&manager).await;
        tokio::task::yield_now().await;

        assert_eq!(service.presentation_mode(), PresentationMode::Embedded);
        app.request(
            topics::VIEWPORT_REQUEST_PRESENTATION_MODE,
            Some(serde_json::json!({"mode": "immersive"})),
        )
        .await
        .unwrap();
        assert_eq!(service.presentation_mode(), PresentationMode::Immersive);
    }

    #[tokio::test]
    async fn embedded_viewport_pushed_to_sessions() {
        let manager = SessionManager::new(SessionConfiguration::new(Role::Manager));
        let service = ViewportService::new(Arc::clone(&manager));
        let (_session, app) = connected_app(&manager).await;

        let (bounds_tx, mut bounds_rx) = tokio::sync::mpsc::unbounded_channel();
        app.on(topics::VIEWPORT_EMBEDDED, move |body| {
            let tx = bounds_tx.clone();
            async move {
                let _ = tx.send(body);
                Ok(None)
            }
        });

        service.send_embedded_viewport(serde_json::json!({"x": 0, "y": 0, "w": 640, "h": 480}));
        let bounds = bounds_rx.recv().await.unwrap().unwrap();
        assert_eq!(bounds["w"], serde_json::json!(640));
    }

    #[tokio::test]
    async fn malformed_mode_request_rejects() {
        let manager = SessionManager::new(SessionConfiguration::new(Role::Manager));
        let service = ViewportService::new(Arc::clone(&manager));
        service.attach();
        let (_session, app) = connected_app(&manager).await;
        tokio::task::yield_now().await;

        let err = app
            .request(topics::VIEWPORT_REQUEST_PRESENTATION_MODE, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Remote(_)));
    }

    #[tokio::test]
    async fn uievents_reach_presenting_viewer() {
        struct AlwaysFocused(SessionId);
        impl FocusSource for AlwaysFocused {
            fn focused_session(&self) -> Option<SessionId> {
                Some(self.0.clone())
            }
        }

        let manager = SessionManager::new(SessionConfiguration::new(Role::Manager));
        let reality = RealityService::new(
            Arc::clone(&manager),
            RealityServiceConfig::default(),
            RealityService::default_loaders(),
        );
        let requester = SessionId::new();
        reality.set_focus_source(Arc::new(AlwaysFocused(requester.clone())));

        // A hosted viewer lets the test hold the content side itself.
        let uri = "https://example.com/ar";
        reality
            .request_presentation(&requester, Some(uri.into()))
            .await
            .unwrap();
        let viewer = reality.viewer(uri).unwrap();
        let mut viewer_connects = viewer.on_connect();

        let (hub_end, content_end) = MessageChannel::pair();
        let content = SessionPort::new("content");
        let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
        content.on(topics::VIEWPORT_UIEVENT, move |body| {
            let tx = event_tx.clone();
            async move {
                let _ = tx.send(body);
                Ok(None)
            }
        });
        content
            .open(content_end, SessionConfiguration::new(Role::RealityViewer))
            .unwrap();
        reality.attach_content_endpoint(uri, hub_end).unwrap();
        viewer_connects.recv().await.unwrap();

        let service = ViewportService::new(Arc::clone(&manager));
        service.set_reality_service(Arc::clone(&reality));
        service.forward_uievent(Some(serde_json::json!({"type": "tap"})));

        let event = event_rx.recv().await.unwrap().unwrap();
        assert_eq!(event["type"], serde_json::json!("tap"));
    }
}
