use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use xrhub_core::errors::{RemoteError, SessionError};
use xrhub_core::session_config::{Role, SessionConfiguration};

use crate::connect::ConnectStrategy;
use crate::port::SessionPort;

/// Owns the privileged session port connected to the manager (possibly
/// itself, in the loopback case) and tracks every connected child port.
pub struct SessionManager {
    configuration: SessionConfiguration,
    port: Arc<SessionPort>,
    managed: Mutex<Vec<Arc<SessionPort>>>,
    connect_tx: broadcast::Sender<Arc<SessionPort>>,
    error_tx: broadcast::Sender<RemoteError>,
}

impl SessionManager {
    pub fn new(configuration: SessionConfiguration) -> Arc<Self> {
        let (connect_tx, _) = broadcast::channel(32);
        let (error_tx, _) = broadcast::channel(32);
        let manager = Arc::new(Self {
            configuration,
            port: SessionPort::new("manager"),
            managed: Mutex::new(Vec::new()),
            connect_tx,
            error_tx,
        });

        // Closing the manager port orphans nothing: every managed session
        // is closed in cascade.
        let weak = Arc::downgrade(&manager);
        let mut closes = manager.port.on_close();
        tokio::spawn(async move {
            if closes.recv().await.is_ok() {
                if let Some(manager) = weak.upgrade() {
                    let sessions: Vec<_> = manager.managed.lock().drain(..).collect();
                    for session in sessions {
                        session.close();
                    }
                }
            }
        });
        manager
    }

    /// The local session's connection to the manager.
    pub fn port(&self) -> &Arc<SessionPort> {
        &self.port
    }

    pub fn configuration(&self) -> &SessionConfiguration {
        &self.configuration
    }

    pub fn is_reality_manager(&self) -> bool {
        self.configuration.role == Role::Manager
    }

    pub fn is_reality_augmenter(&self) -> bool {
        self.configuration.role == Role::Application
    }

    pub fn is_reality_viewer(&self) -> bool {
        self.configuration.role == Role::RealityViewer
    }

    /// Guard for manager-only APIs. This is a correctness boundary, not a
    /// security one.
    pub fn ensure_manager(&self) -> Result<(), SessionError> {
        if self.is_reality_manager() {
            Ok(())
        } else {
            Err(SessionError::WrongRole("manager"))
        }
    }

    pub fn ensure_not_viewer(&self) -> Result<(), SessionError> {
        if self.is_reality_viewer() {
            Err(SessionError::WrongRole("application or manager"))
        } else {
            Ok(())
        }
    }

    /// Establish the manager connection via the given strategy.
    pub async fn connect(
        self: &Arc<Self>,
        strategy: &dyn ConnectStrategy,
    ) -> Result<(), SessionError> {
        tracing::info!(strategy = strategy.name(), "connecting session manager");
        strategy.connect(self).await
    }

    /// Create a port for an incoming session. The port is returned
    /// unopened so the caller can attach handlers before the remote side
    /// opens; once its handshake completes it joins the managed collection
    /// and the connect event fires.
    pub fn add_managed_session_port(
        self: &Arc<Self>,
        uri: impl Into<String>,
    ) -> Result<Arc<SessionPort>, SessionError> {
        self.ensure_manager()?;
        let port = SessionPort::new(uri.into());

        // Aggregate errors from every managed session.
        let error_tx = self.error_tx.clone();
        let port_id = port.id.clone();
        let mut errors = port.on_error();
        tokio::spawn(async move {
            while let Ok(error) = errors.recv().await {
                if error_tx.receiver_count() == 0 {
                    tracing::error!(session_id = %port_id, message = %error.message, "managed session error");
                } else {
                    let _ = error_tx.send(error);
                }
            }
        });

        let weak = Arc::downgrade(self);
        let watched = Arc::clone(&port);
        let mut connects = port.on_connect();
        tokio::spawn(async move {
            if connects.recv().await.is_err() {
                return;
            }
            let Some(manager) = weak.upgrade() else { return };
            {
                let mut managed = manager.managed.lock();
                if !managed.iter().any(|p| p.id == watched.id) {
                    managed.push(Arc::clone(&watched));
                }
            }
            let _ = manager.connect_tx.send(Arc::clone(&watched));

            let mut closes = watched.on_close();
            let _ = closes.recv().await;
            if let Some(manager) = weak.upgrade() {
                manager.managed.lock().retain(|p| p.id != watched.id);
            }
        });

        Ok(port)
    }

    /// Connected managed sessions, in connection order.
    pub fn managed_sessions(&self) -> Vec<Arc<SessionPort>> {
        self.managed.lock().clone()
    }

    /// Fires once per managed session completing its handshake.
    pub fn on_managed_connect(&self) -> broadcast::Receiver<Arc<SessionPort>> {
        self.connect_tx.subscribe()
    }

    /// Aggregate error event over the manager port and all managed ports.
    pub fn on_error(&self) -> broadcast::Receiver<RemoteError> {
        self.error_tx.subscribe()
    }
}
