use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use xrhub_core::errors::{RealityError, RemoteError, SessionError};
use xrhub_core::frame::FrameState;
use xrhub_core::ids::SessionId;
use xrhub_core::session_config::{Role, SessionConfiguration};
use xrhub_core::topics;
use xrhub_session::channel::Endpoint;
use xrhub_session::manager::SessionManager;
use xrhub_session::port::SessionPort;

use crate::loaders::{EmptyRealityLoader, HostedRealityLoader, LiveRealityLoader, RealityLoader};
use crate::relay;
use crate::viewer::{RealityViewer, ViewerType};

/// Who currently holds focus. Implemented by the focus arbitration
/// service; presentation switches are gated on it.
pub trait FocusSource: Send + Sync {
    fn focused_session(&self) -> Option<SessionId>;
}

/// Explicit construction-time configuration (no ambient defaults).
#[derive(Clone, Debug)]
pub struct RealityServiceConfig {
    /// Viewer presented when a request names no URI.
    pub default_uri: String,
}

impl Default for RealityServiceConfig {
    fn default() -> Self {
        Self {
            default_uri: "reality:empty".into(),
        }
    }
}

struct ArbitrationState {
    installers: HashMap<String, HashSet<SessionId>>,
    viewers: HashMap<String, Arc<RealityViewer>>,
    presenting: Option<String>,
}

/// Manager-side single source of truth for which reality viewer is
/// presenting. Tracks installs per session (reference counted), runs the
/// type-specific loaders, and relays custom-protocol viewer traffic.
pub struct RealityService {
    manager: Arc<SessionManager>,
    default_uri: String,
    loaders: Vec<Arc<dyn RealityLoader>>,
    focus: Mutex<Option<Arc<dyn FocusSource>>>,
    state: Mutex<ArbitrationState>,
    frame_tx: broadcast::Sender<FrameState>,
    change_tx: broadcast::Sender<Option<String>>,
}

impl RealityService {
    pub fn new(
        manager: Arc<SessionManager>,
        config: RealityServiceConfig,
        loaders: Vec<Arc<dyn RealityLoader>>,
    ) -> Arc<Self> {
        let (frame_tx, _) = broadcast::channel(64);
        let (change_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            manager,
            default_uri: config.default_uri,
            loaders,
            focus: Mutex::new(None),
            state: Mutex::new(ArbitrationState {
                installers: HashMap::new(),
                viewers: HashMap::new(),
                presenting: None,
            }),
            frame_tx,
            change_tx,
        })
    }

    /// The built-in loader set: empty, live, hosted.
    pub fn default_loaders() -> Vec<Arc<dyn RealityLoader>> {
        vec![
            Arc::new(EmptyRealityLoader),
            Arc::new(LiveRealityLoader),
            Arc::new(HostedRealityLoader),
        ]
    }

    pub fn set_focus_source(&self, focus: Arc<dyn FocusSource>) {
        *self.focus.lock() = Some(focus);
    }

    /// Frames republished from the presenting viewer.
    pub fn on_frame(&self) -> broadcast::Receiver<FrameState> {
        self.frame_tx.subscribe()
    }

    /// Fires when the presenting viewer changes; carries the new URI.
    pub fn on_present_change(&self) -> broadcast::Receiver<Option<String>> {
        self.change_tx.subscribe()
    }

    pub fn presenting_uri(&self) -> Option<String> {
        self.state.lock().presenting.clone()
    }

    pub fn viewer(&self, uri: &str) -> Option<Arc<RealityViewer>> {
        self.state.lock().viewers.get(uri).cloned()
    }

    /// Start listening: every session that connects to the manager gets
    /// the reality topic handlers, and closing the manager session tears
    /// every installed viewer down.
    pub fn attach(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let mut connects = self.manager.on_managed_connect();
        tokio::spawn(async move {
            while let Ok(session) = connects.recv().await {
                service.wire_session(session);
            }
        });

        let service = Arc::clone(self);
        let mut closes = self.manager.port().on_close();
        tokio::spawn(async move {
            if closes.recv().await.is_ok() {
                service.destroy_all();
            }
        });
    }

    /// Register the arbitration topic handlers on a newly connected
    /// session, and start relaying if it is a custom-protocol viewer.
    fn wire_session(self: &Arc<Self>, session: Arc<SessionPort>) {
        let service = Arc::clone(self);
        let sid = session.id.clone();
        session.on(topics::REALITY_INSTALL, move |body| {
            let service = Arc::clone(&service);
            let sid = sid.clone();
            async move {
                let uri = required_uri(&body)?;
                service.install(&sid, &uri).await.map_err(reality_reject)?;
                Ok(None)
            }
        });

        let service = Arc::clone(self);
        let sid = session.id.clone();
        session.on(topics::REALITY_UNINSTALL, move |body| {
            let service = Arc::clone(&service);
            let sid = sid.clone();
            async move {
                let uri = required_uri(&body)?;
                service.uninstall(&sid, &uri).map_err(reality_reject)?;
                Ok(None)
            }
        });

        // Current and legacy presentation-request topics share a handler.
        for topic in [topics::REALITY_REQUEST, topics::REALITY_DESIRED] {
            let service = Arc::clone(self);
            let sid = session.id.clone();
            session.on(topic, move |body| {
                let service = Arc::clone(&service);
                let sid = sid.clone();
                async move {
                    let uri = body
                        .as_ref()
                        .and_then(|b| b.get("uri"))
                        .and_then(|v| v.as_str())
                        .map(str::to_owned);
                    service
                        .request_presentation(&sid, uri)
                        .await
                        .map_err(reality_reject)?;
                    Ok(None)
                }
            });
        }

        let service = Arc::clone(self);
        let sid = session.id.clone();
        session.on(topics::REALITY_FRAME_STATE, move |body| {
            let service = Arc::clone(&service);
            let sid = sid.clone();
            async move {
                service.handle_frame(&sid, body);
                Ok(None)
            }
        });

        if relay::custom_protocol_viewer(&session) {
            relay::wire_relays(&self.manager, &session);
        }
    }

    /// Install a viewer for `uri` on behalf of a session. The viewer is
    /// created (and its loader run) on the first install; later installs
    /// only join the installer set.
    pub async fn install(
        &self,
        session_id: &SessionId,
        uri: &str,
    ) -> Result<Arc<RealityViewer>, RealityError> {
        let viewer_type = ViewerType::from_uri(uri)?;
        let (viewer, needs_load) = {
            let mut state = self.state.lock();
            state
                .installers
                .entry(uri.to_owned())
                .or_default()
                .insert(session_id.clone());
            match state.viewers.get(uri) {
                Some(viewer) => (Arc::clone(viewer), false),
                None => {
                    let viewer = RealityViewer::new(uri)?;
                    state.viewers.insert(uri.to_owned(), Arc::clone(&viewer));
                    (viewer, true)
                }
            }
        };

        if needs_load {
            let loader = self
                .loaders
                .iter()
                .find(|l| l.viewer_type() == viewer_type)
                .cloned()
                .ok_or_else(|| RealityError::UnsupportedType(uri.to_owned()))?;
            if let Err(e) = loader.load(&viewer, &self.manager).await {
                let mut state = self.state.lock();
                state.viewers.remove(uri);
                state.installers.remove(uri);
                return Err(e);
            }
            tracing::info!(uri, session_id = %session_id, "reality viewer installed");
        }
        Ok(viewer)
    }

    /// Remove a session from a viewer's installer set. The count is
    /// decremented unconditionally; the call reports `StillInUse` while
    /// other installers remain and succeeds once the viewer is destroyed.
    pub fn uninstall(&self, session_id: &SessionId, uri: &str) -> Result<(), RealityError> {
        let (viewer, presenting_cleared) = {
            let mut state = self.state.lock();
            let Some(installers) = state.installers.get_mut(uri) else {
                return Err(RealityError::NotInstalled(uri.to_owned()));
            };
            installers.remove(session_id);
            if !installers.is_empty() {
                return Err(RealityError::StillInUse(uri.to_owned()));
            }
            state.installers.remove(uri);
            let viewer = state.viewers.remove(uri);
            let cleared = state.presenting.as_deref() == Some(uri);
            if cleared {
                state.presenting = None;
            }
            (viewer, cleared)
        };
        if let Some(viewer) = viewer {
            viewer.destroy();
            tracing::info!(uri, "reality viewer uninstalled");
        }
        if presenting_cleared {
            let _ = self.change_tx.send(None);
        }
        Ok(())
    }

    /// Switch the presenting viewer. Only the focused session or the
    /// manager itself may request this; the target is installed on demand
    /// and every installed viewer's presenting flag is settled in one
    /// arbitration step.
    pub async fn request_presentation(
        &self,
        session_id: &SessionId,
        uri: Option<String>,
    ) -> Result<(), RealityError> {
        if !self.may_request(session_id) {
            return Err(RealityError::Session(SessionError::PermissionDenied(
                "presentation requests require focus".into(),
            )));
        }
        let uri = uri.unwrap_or_else(|| self.default_uri.clone());
        self.install(session_id, &uri).await?;

        let changed = {
            let mut state = self.state.lock();
            let changed = state.presenting.as_deref() != Some(uri.as_str());
            state.presenting = Some(uri.clone());
            // All flags settle under the lock: no observer sees two
            // presenting viewers, or none, mid-switch.
            for (viewer_uri, viewer) in &state.viewers {
                viewer.set_presenting(viewer_uri == &uri);
            }
            changed
        };
        if changed {
            tracing::info!(uri = %uri, "presenting reality changed");
            let _ = self.change_tx.send(Some(uri));
        }
        Ok(())
    }

    fn may_request(&self, session_id: &SessionId) -> bool {
        if let Some(focus) = self.focus.lock().clone() {
            if focus.focused_session().as_ref() == Some(session_id) {
                return true;
            }
        }
        // The manager's own session (e.g. the loopback hub peer).
        self.manager
            .managed_sessions()
            .iter()
            .find(|p| &p.id == session_id)
            .and_then(|p| p.peer())
            .map(|peer| peer.configuration.role == Role::Manager)
            .unwrap_or(false)
    }

    /// Per-frame state from a viewer's content session. Forwarded (tagged
    /// with the viewer URI) only while that viewer presents; frames from a
    /// backgrounded viewer are dropped.
    fn handle_frame(&self, session_id: &SessionId, body: Option<serde_json::Value>) {
        let Some(raw) = body else { return };
        let viewer = {
            self.state
                .lock()
                .viewers
                .values()
                .find(|v| v.session().map(|s| s.id == *session_id).unwrap_or(false))
                .cloned()
        };
        let Some(viewer) = viewer else {
            tracing::trace!(session_id = %session_id, "frame from unknown session");
            return;
        };
        if !viewer.is_presenting() {
            tracing::trace!(uri = %viewer.uri(), "dropping frame from non-presenting viewer");
            return;
        }
        let mut frame: FrameState = match serde_json::from_value(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(uri = %viewer.uri(), error = %e, "malformed frame state");
                return;
            }
        };
        frame.reality = Some(viewer.uri().to_owned());
        let _ = self.frame_tx.send(frame.clone());

        let body = serde_json::to_value(&frame).ok();
        for session in self.manager.managed_sessions() {
            let is_app = session
                .peer()
                .map(|peer| peer.configuration.role == Role::Application)
                .unwrap_or(false);
            if is_app {
                let _ = session.send(topics::REALITY_FRAME_STATE, body.clone());
            }
        }
    }

    /// Open a hosted viewer's content port with an endpoint that arrived
    /// from a remote context.
    pub fn attach_content_endpoint(&self, uri: &str, endpoint: Endpoint) -> Result<(), RealityError> {
        let viewer = self
            .viewer(uri)
            .ok_or_else(|| RealityError::NotInstalled(uri.to_owned()))?;
        let port = viewer
            .session()
            .ok_or_else(|| RealityError::NotInstalled(uri.to_owned()))?;
        port.open(endpoint, SessionConfiguration::new(Role::Manager))?;
        Ok(())
    }

    fn destroy_all(&self) {
        let viewers: Vec<_> = {
            let mut state = self.state.lock();
            state.installers.clear();
            state.presenting = None;
            state.viewers.drain().map(|(_, v)| v).collect()
        };
        for viewer in viewers {
            viewer.destroy();
        }
        tracing::info!("all reality viewers destroyed");
    }
}

fn required_uri(body: &Option<serde_json::Value>) -> Result<String, SessionError> {
    body.as_ref()
        .and_then(|b| b.get("uri"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .ok_or_else(|| SessionError::Remote(RemoteError::new("missing required parameter: uri")))
}

fn reality_reject(error: RealityError) -> SessionError {
    match error {
        RealityError::Session(e) => e,
        other => SessionError::Remote(RemoteError::new(other.to_string())),
    }
}
