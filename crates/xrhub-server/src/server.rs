use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use xrhub_core::envelope::{WireEncoding, WirePayload};
use xrhub_core::session_config::{Role, SessionConfiguration};
use xrhub_session::channel::Endpoint;
use xrhub_session::manager::SessionManager;

use crate::registry::{self, SocketRegistry};

/// Debug-socket host configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9092,
            max_send_queue: 256,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
struct AppState {
    manager: Arc<SessionManager>,
    registry: Arc<SocketRegistry>,
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Start the host: every WebSocket client that connects becomes a managed
/// session of `manager`.
pub async fn start(
    config: ServerConfig,
    manager: Arc<SessionManager>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(SocketRegistry::new(config.max_send_queue));
    let cleanup = registry::start_cleanup_task(Arc::clone(&registry), config.cleanup_interval);

    let state = AppState {
        manager,
        registry: Arc::clone(&registry),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let port = listener.local_addr()?.port();
    tracing::info!(port, "debug socket host started");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .ok();
    });

    Ok(ServerHandle {
        port,
        registry,
        cancel,
        _server: server,
        _cleanup: cleanup,
    })
}

/// Keeps the host's background tasks alive and shuts them down on request.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Arc<SocketRegistry>,
    cancel: CancellationToken,
    _server: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._cleanup.abort();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Turn one WebSocket into a transport endpoint feeding a managed session
/// port, then drive the socket until either side disconnects.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client, rx) = state.registry.register();
    tracing::info!(socket_id = %client.id, "debug socket client connected");

    let port = match state
        .manager
        .add_managed_session_port(format!("debug-socket:{}", client.id))
    {
        Ok(port) => port,
        Err(e) => {
            tracing::error!(socket_id = %client.id, error = %e, "cannot create session port");
            state.registry.unregister(&client.id);
            return;
        }
    };
    client.set_session(port.id.clone());

    let (to_remote_tx, mut to_remote_rx) = mpsc::unbounded_channel();
    let (from_remote_tx, from_remote_rx) = mpsc::unbounded_channel();
    let endpoint = Endpoint::from_parts(to_remote_tx, from_remote_rx);

    // Outbound pump: envelopes posted by the port become text frames on
    // the client's send queue.
    let registry = Arc::clone(&state.registry);
    let outbound_id = client.id.clone();
    tokio::spawn(async move {
        while let Some(envelope) = to_remote_rx.recv().await {
            if let Ok(WirePayload::Text(text)) = WireEncoding::Json.encode(&envelope) {
                registry.send_to(&outbound_id, text);
            }
        }
    });

    if port
        .open(endpoint, SessionConfiguration::new(Role::Manager))
        .is_err()
    {
        state.registry.unregister(&client.id);
        return;
    }

    registry::handle_ws_connection(
        socket,
        client,
        rx,
        Arc::clone(&state.registry),
        from_remote_tx,
    )
    .await;
    port.close();
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "clients": state.registry.count(),
        "sessions": state.manager.managed_sessions().len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use xrhub_core::envelope::Envelope;
    use xrhub_core::topics;

    fn manager() -> Arc<SessionManager> {
        SessionManager::new(SessionConfiguration::new(Role::Manager))
    }

    #[tokio::test]
    async fn router_builds() {
        let state = AppState {
            manager: manager(),
            registry: Arc::new(SocketRegistry::new(32)),
        };
        let _router = build_router(state);
    }

    #[tokio::test]
    async fn socket_client_becomes_managed_session() {
        let manager = manager();
        let mut connects = manager.on_managed_connect();
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let handle = start(config, Arc::clone(&manager)).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("ws://127.0.0.1:{}/ws", handle.port);
        let (mut stream, _) = connect_async(&url).await.unwrap();

        // Open our side of the session over the socket.
        let open = Envelope::new(
            topics::SESSION_OPEN,
            serde_json::to_value(SessionConfiguration::new(Role::Application)).ok(),
        );
        let text = match WireEncoding::Json.encode(&open).unwrap() {
            WirePayload::Text(text) => text,
            _ => unreachable!(),
        };
        stream.send(WsMessage::Text(text.into())).await.unwrap();

        // The hub's own open message arrives as a text frame.
        let mut saw_open = false;
        while let Some(Ok(msg)) = stream.next().await {
            if let WsMessage::Text(text) = msg {
                if text.contains(topics::SESSION_OPEN) {
                    saw_open = true;
                    break;
                }
            }
        }
        assert!(saw_open);

        let session = connects.recv().await.unwrap();
        assert_eq!(
            session.peer().unwrap().configuration.role,
            Role::Application
        );
        assert_eq!(handle.registry.count(), 1);

        handle.shutdown();
    }

    #[tokio::test]
    async fn closing_socket_closes_managed_session() {
        let manager = manager();
        let mut connects = manager.on_managed_connect();
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let handle = start(config, Arc::clone(&manager)).await.unwrap();

        let url = format!("ws://127.0.0.1:{}/ws", handle.port);
        let (mut stream, _) = connect_async(&url).await.unwrap();
        let open = Envelope::new(
            topics::SESSION_OPEN,
            serde_json::to_value(SessionConfiguration::new(Role::Application)).ok(),
        );
        let text = match WireEncoding::Json.encode(&open).unwrap() {
            WirePayload::Text(text) => text,
            _ => unreachable!(),
        };
        stream.send(WsMessage::Text(text.into())).await.unwrap();

        let session = connects.recv().await.unwrap();
        let mut closes = session.on_close();
        stream.close(None).await.unwrap();
        closes.recv().await.unwrap();
        handle.shutdown();
    }
}
