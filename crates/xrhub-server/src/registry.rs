use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use xrhub_core::envelope::{Envelope, WireEncoding, WirePayload};
use xrhub_core::ids::SessionId;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const SOCKET_TIMEOUT: Duration = Duration::from_secs(90);

/// Unique identifier for one debug-socket client.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SocketId(pub String);

impl Default for SocketId {
    fn default() -> Self {
        Self(format!("sock_{}", Uuid::now_v7()))
    }
}

impl SocketId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One connected debug-socket client and its outbound text queue.
pub struct SocketClient {
    pub id: SocketId,
    session_id: Mutex<Option<SessionId>>,
    tx: mpsc::Sender<String>,
    connected: AtomicBool,
    last_pong: AtomicU64,
}

impl SocketClient {
    fn new(id: SocketId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            session_id: Mutex::new(None),
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.lock().clone()
    }

    pub fn set_session(&self, session_id: SessionId) {
        *self.session_id.lock() = Some(session_id);
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < SOCKET_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of connected debug-socket clients.
pub struct SocketRegistry {
    clients: DashMap<SocketId, Arc<SocketClient>>,
    max_send_queue: usize,
}

impl SocketRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new client; returns the client and the receiving half of
    /// its outbound queue.
    pub fn register(&self) -> (Arc<SocketClient>, mpsc::Receiver<String>) {
        let id = SocketId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let client = Arc::new(SocketClient::new(id.clone(), tx));
        self.clients.insert(id, Arc::clone(&client));
        (client, rx)
    }

    pub fn unregister(&self, id: &SocketId) {
        if let Some((_, client)) = self.clients.remove(id) {
            client.connected.store(false, Ordering::Relaxed);
        }
    }

    pub fn get(&self, id: &SocketId) -> Option<Arc<SocketClient>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Queue a text frame for a client. The queue is bounded; a full queue
    /// drops the frame with a warning rather than stalling the manager.
    pub fn send_to(&self, id: &SocketId, message: String) -> bool {
        let Some(client) = self.get(id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    socket_id = %id,
                    frame_len = msg.len(),
                    "send queue full, dropping frame"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Drop clients that stopped answering pings.
    pub fn cleanup_dead_clients(&self) -> usize {
        let dead: Vec<SocketId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| entry.value().id.clone())
            .collect();
        let removed = dead.len();
        for id in dead {
            self.unregister(&id);
            tracing::info!(socket_id = %id, "cleaned up dead client");
        }
        removed
    }
}

/// Drive one WebSocket: text frames out of the client queue (plus periodic
/// pings) on the writer side; inbound text frames decoded into envelopes
/// for the client's session port on the reader side. Returns when either
/// side finishes, unregistering the client.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client: Arc<SocketClient>,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<SocketRegistry>,
    inbound: mpsc::UnboundedSender<Envelope>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_client = Arc::clone(&client);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(socket_id = %writer_client.id, "sent ping");
                }
            }
        }
        writer_client.connected.store(false, Ordering::Relaxed);
    });

    let reader_client = Arc::clone(&client);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    let payload = WirePayload::Text(text.as_str().to_owned());
                    match WireEncoding::Json.decode(&payload) {
                        Ok(envelope) => {
                            if inbound.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                socket_id = %reader_client.id,
                                error = %e,
                                "dropping malformed frame"
                            );
                        }
                    }
                }
                WsMessage::Pong(_) => reader_client.record_pong(),
                WsMessage::Close(_) => break,
                // axum answers pings automatically.
                WsMessage::Ping(_) => {}
                _ => {}
            }
        }
        // Dropping `inbound` closes the session port's inbound stream.
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }
    registry.unregister(&client.id);
}

/// Background task that periodically drops dead clients.
pub fn start_cleanup_task(
    registry: Arc<SocketRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if removed > 0 {
                tracing::info!(removed, "dead client cleanup");
            }
        }
    })
}
