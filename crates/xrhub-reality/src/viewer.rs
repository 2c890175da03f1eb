use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use xrhub_core::errors::RealityError;
use xrhub_session::port::SessionPort;

/// Viewer type, derived from the viewer URI.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewerType {
    /// `reality:empty` — a blank scene.
    Empty,
    /// `reality:live` — camera passthrough.
    Live,
    /// Any other URL — content hosted in a remote context.
    Hosted,
}

impl ViewerType {
    pub fn from_uri(uri: &str) -> Result<Self, RealityError> {
        if let Some(kind) = uri.strip_prefix("reality:") {
            match kind {
                "empty" => Ok(Self::Empty),
                "live" => Ok(Self::Live),
                _ => Err(RealityError::UnsupportedType(uri.to_owned())),
            }
        } else if uri.contains("://") {
            Ok(Self::Hosted)
        } else {
            Err(RealityError::UnsupportedType(uri.to_owned()))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewerState {
    /// Loaded but its content session has not opened yet.
    Loaded,
    /// Content session handshake complete.
    Connected,
    /// Terminal.
    Destroyed,
}

/// One installable content source, tracked by URI.
///
/// Installed and presenting are independent: a viewer stays installed while
/// backgrounded, and at most one installed viewer presents at a time (the
/// arbitration service maintains that invariant).
pub struct RealityViewer {
    uri: String,
    viewer_type: ViewerType,
    state: Mutex<ViewerState>,
    presenting: AtomicBool,
    session: Mutex<Option<Arc<SessionPort>>>,
    present_tx: broadcast::Sender<bool>,
    connect_tx: broadcast::Sender<()>,
}

impl RealityViewer {
    pub fn new(uri: impl Into<String>) -> Result<Arc<Self>, RealityError> {
        let uri = uri.into();
        let viewer_type = ViewerType::from_uri(&uri)?;
        let (present_tx, _) = broadcast::channel(16);
        let (connect_tx, _) = broadcast::channel(4);
        Ok(Arc::new(Self {
            uri,
            viewer_type,
            state: Mutex::new(ViewerState::Loaded),
            presenting: AtomicBool::new(false),
            session: Mutex::new(None),
            present_tx,
            connect_tx,
        }))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn viewer_type(&self) -> ViewerType {
        self.viewer_type
    }

    pub fn state(&self) -> ViewerState {
        *self.state.lock()
    }

    pub fn is_presenting(&self) -> bool {
        self.presenting.load(Ordering::Acquire)
    }

    /// The content's session port, once a loader has provided one.
    pub fn session(&self) -> Option<Arc<SessionPort>> {
        self.session.lock().clone()
    }

    /// Fires when presenting flips; carries the new flag.
    pub fn on_present_change(&self) -> broadcast::Receiver<bool> {
        self.present_tx.subscribe()
    }

    /// Fires once when the content session completes its handshake.
    pub fn on_connect(&self) -> broadcast::Receiver<()> {
        self.connect_tx.subscribe()
    }

    /// Bind the content's session port. Transitions to `Connected` (and
    /// raises the connect event) once the port's handshake completes.
    pub fn attach_session(self: &Arc<Self>, port: Arc<SessionPort>) {
        *self.session.lock() = Some(Arc::clone(&port));
        let viewer = Arc::clone(self);
        tokio::spawn(async move {
            if port.wait_connected().await.is_ok() {
                let mut state = viewer.state.lock();
                if *state == ViewerState::Loaded {
                    *state = ViewerState::Connected;
                    drop(state);
                    tracing::debug!(uri = %viewer.uri, "reality viewer connected");
                    let _ = viewer.connect_tx.send(());
                }
            }
        });
    }

    /// Flip the presenting flag. No-op when unchanged; otherwise raises
    /// one present-change event.
    pub fn set_presenting(&self, flag: bool) {
        if self.presenting.swap(flag, Ordering::AcqRel) != flag {
            let _ = self.present_tx.send(flag);
        }
    }

    /// Idempotent teardown: closes the content session (from either side)
    /// and clears presenting.
    pub fn destroy(&self) {
        {
            let mut state = self.state.lock();
            if *state == ViewerState::Destroyed {
                return;
            }
            *state = ViewerState::Destroyed;
        }
        self.set_presenting(false);
        if let Some(session) = self.session.lock().clone() {
            session.close();
        }
        tracing::debug!(uri = %self.uri, "reality viewer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrhub_core::session_config::{Role, SessionConfiguration};
    use xrhub_session::channel::MessageChannel;
    use xrhub_session::port::PortState;

    #[test]
    fn viewer_type_from_uri() {
        assert_eq!(ViewerType::from_uri("reality:empty").unwrap(), ViewerType::Empty);
        assert_eq!(ViewerType::from_uri("reality:live").unwrap(), ViewerType::Live);
        assert_eq!(
            ViewerType::from_uri("https://example.com/ar").unwrap(),
            ViewerType::Hosted
        );
        assert!(ViewerType::from_uri("reality:tango").is_err());
        assert!(ViewerType::from_uri("not-a-uri").is_err());
    }

    #[tokio::test]
    async fn connects_when_session_opens() {
        let viewer = RealityViewer::new("reality:empty").unwrap();
        assert_eq!(viewer.state(), ViewerState::Loaded);

        let mut connects = viewer.on_connect();
        let (hub_end, content_end) = MessageChannel::pair();
        let hub_port = SessionPort::new("reality:empty");
        viewer.attach_session(Arc::clone(&hub_port));
        hub_port
            .open(hub_end, SessionConfiguration::new(Role::Manager))
            .unwrap();
        let content = SessionPort::new("content");
        content
            .open(content_end, SessionConfiguration::new(Role::RealityViewer))
            .unwrap();

        connects.recv().await.unwrap();
        assert_eq!(viewer.state(), ViewerState::Connected);
    }

    #[tokio::test]
    async fn set_presenting_fires_only_on_change() {
        let viewer = RealityViewer::new("reality:empty").unwrap();
        let mut changes = viewer.on_present_change();

        viewer.set_presenting(true);
        viewer.set_presenting(true);
        viewer.set_presenting(false);

        assert!(changes.recv().await.unwrap());
        assert!(!changes.recv().await.unwrap());
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_closes_session() {
        let viewer = RealityViewer::new("reality:empty").unwrap();
        let (hub_end, content_end) = MessageChannel::pair();
        let hub_port = SessionPort::new("reality:empty");
        viewer.attach_session(Arc::clone(&hub_port));
        hub_port
            .open(hub_end, SessionConfiguration::new(Role::Manager))
            .unwrap();
        let content = SessionPort::new("content");
        content
            .open(content_end, SessionConfiguration::new(Role::RealityViewer))
            .unwrap();
        hub_port.wait_connected().await.unwrap();

        viewer.set_presenting(true);
        viewer.destroy();
        viewer.destroy();
        assert_eq!(viewer.state(), ViewerState::Destroyed);
        assert!(!viewer.is_presenting());
        assert_eq!(hub_port.state(), PortState::Closed);
    }
}
