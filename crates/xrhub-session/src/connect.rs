use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use xrhub_core::envelope::{Envelope, WireEncoding, WirePayload};
use xrhub_core::errors::SessionError;
use xrhub_core::session_config::{Role, SessionConfiguration};

use crate::channel::{Endpoint, MessageChannel};
use crate::manager::SessionManager;

/// Establishes the transport channel between a session and its manager and
/// opens the local manager port. Strategies self-report availability so the
/// host can pick the first viable one at startup. Invoked at most once.
#[async_trait]
pub trait ConnectStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn available(&self) -> bool {
        true
    }

    async fn connect(&self, manager: &Arc<SessionManager>) -> Result<(), SessionError>;
}

/// Self-hosting manager: the manager session connects to its own hub over
/// an in-process channel pair.
pub struct LoopbackConnectStrategy;

#[async_trait]
impl ConnectStrategy for LoopbackConnectStrategy {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn connect(&self, manager: &Arc<SessionManager>) -> Result<(), SessionError> {
        let (local_end, hub_end) = MessageChannel::pair();
        let hub_port = manager.add_managed_session_port("loopback")?;
        hub_port.open(hub_end, SessionConfiguration::new(Role::Manager))?;
        manager
            .port()
            .open(local_end, manager.configuration().clone())?;
        manager.port().wait_connected().await
    }
}

/// Connects to a remote manager's debug-socket host over WebSocket.
pub struct DebugSocketConnectStrategy {
    pub url: String,
}

impl DebugSocketConnectStrategy {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ConnectStrategy for DebugSocketConnectStrategy {
    fn name(&self) -> &'static str {
        "debug-socket"
    }

    async fn connect(&self, manager: &Arc<SessionManager>) -> Result<(), SessionError> {
        let (stream, _) = connect_async(&self.url).await.map_err(|e| {
            SessionError::Remote(xrhub_core::errors::RemoteError::new(format!(
                "debug socket connect failed: {e}"
            )))
        })?;
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (to_remote_tx, mut to_remote_rx) = mpsc::unbounded_channel::<Envelope>();
        let (from_remote_tx, from_remote_rx) = mpsc::unbounded_channel::<Envelope>();
        let endpoint = Endpoint::from_parts(to_remote_tx, from_remote_rx);

        // Writer pump: envelopes from the port out to the socket.
        tokio::spawn(async move {
            while let Some(envelope) = to_remote_rx.recv().await {
                let payload = match WireEncoding::Json.encode(&envelope) {
                    Ok(WirePayload::Text(text)) => text,
                    _ => continue,
                };
                if ws_tx.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_tx.send(WsMessage::Close(None)).await;
        });

        // Reader pump: socket text frames in to the port.
        tokio::spawn(async move {
            while let Some(Ok(msg)) = ws_rx.next().await {
                match msg {
                    WsMessage::Text(text) => {
                        let payload = WirePayload::Text(text.as_str().to_owned());
                        match WireEncoding::Json.decode(&payload) {
                            Ok(envelope) => {
                                if from_remote_tx.send(envelope).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "dropping malformed debug-socket frame");
                            }
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            // Dropping the sender closes the port's inbound stream.
        });

        manager
            .port()
            .open(endpoint, manager.configuration().clone())?;
        manager.port().wait_connected().await
    }
}
