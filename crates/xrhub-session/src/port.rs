use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;

use xrhub_core::envelope::Envelope;
use xrhub_core::errors::{RemoteError, SessionError};
use xrhub_core::ids::{MessageId, SessionId};
use xrhub_core::session_config::SessionConfiguration;
use xrhub_core::topics;

use crate::channel::Endpoint;
use crate::compat::ProtocolCompat;

/// Outcome of a topic handler. `Ok(None)` is fire-and-forget; whether a
/// value or error travels back over the wire is decided by the *inbound*
/// envelope's expects-response flag, never by the handler itself.
pub type HandlerResult = Result<Option<serde_json::Value>, SessionError>;

type Handler = Arc<dyn Fn(Option<serde_json::Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortState {
    Unopened,
    Opened,
    Connected,
    Closed,
}

/// Everything learned about the peer at open time: its immutable
/// configuration plus the compatibility shim selected from its version.
pub struct PeerInfo {
    pub configuration: SessionConfiguration,
    pub compat: ProtocolCompat,
}

/// One participant's end of a managed connection.
///
/// Wraps exactly one transport endpoint with the topic-addressed RPC
/// protocol: open handshake, request/response correlation, reserved
/// session topics, and idempotent close. Inbound envelopes are dispatched
/// sequentially by a single task, so handlers for one port never run
/// concurrently with each other.
pub struct SessionPort {
    pub id: SessionId,
    label: String,
    state: Mutex<PortState>,
    state_tx: watch::Sender<PortState>,
    state_rx: watch::Receiver<PortState>,
    endpoint: Mutex<Option<Arc<Endpoint>>>,
    handlers: Mutex<HashMap<String, Handler>>,
    pending: Mutex<HashMap<MessageId, oneshot::Sender<HandlerResult>>>,
    peer: Mutex<Option<Arc<PeerInfo>>>,
    connect_tx: broadcast::Sender<SessionConfiguration>,
    close_tx: broadcast::Sender<()>,
    error_tx: broadcast::Sender<RemoteError>,
    suppress_unknown_topics: AtomicBool,
    close_event_fired: AtomicBool,
    cancel: CancellationToken,
}

impl SessionPort {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(PortState::Unopened);
        let (connect_tx, _) = broadcast::channel(8);
        let (close_tx, _) = broadcast::channel(8);
        let (error_tx, _) = broadcast::channel(32);
        Arc::new(Self {
            id: SessionId::new(),
            label: label.into(),
            state: Mutex::new(PortState::Unopened),
            state_tx,
            state_rx,
            endpoint: Mutex::new(None),
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            peer: Mutex::new(None),
            connect_tx,
            close_tx,
            error_tx,
            suppress_unknown_topics: AtomicBool::new(false),
            close_event_fired: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> PortState {
        *self.state.lock()
    }

    fn set_state(&self, next: PortState) {
        *self.state.lock() = next;
        let _ = self.state_tx.send(next);
    }

    /// Register the handler for a topic. Exactly one handler per topic;
    /// the last writer wins.
    pub fn on<F, Fut>(&self, topic: impl Into<String>, handler: F)
    where
        F: Fn(Option<serde_json::Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |body| Box::pin(handler(body)));
        self.handlers.lock().insert(topic.into(), handler);
    }

    pub fn remove_handler(&self, topic: &str) {
        self.handlers.lock().remove(topic);
    }

    /// Suppress local error events for fire-and-forget messages on
    /// unregistered topics. Used when a peer deliberately speaks optional
    /// protocols we do not implement.
    pub fn set_suppress_unknown_topics(&self, suppress: bool) {
        self.suppress_unknown_topics.store(suppress, Ordering::Relaxed);
    }

    pub fn on_connect(&self) -> broadcast::Receiver<SessionConfiguration> {
        self.connect_tx.subscribe()
    }

    pub fn on_close(&self) -> broadcast::Receiver<()> {
        self.close_tx.subscribe()
    }

    pub fn on_error(&self) -> broadcast::Receiver<RemoteError> {
        self.error_tx.subscribe()
    }

    /// Peer info recorded by the open handshake; None until connected.
    pub fn peer(&self) -> Option<Arc<PeerInfo>> {
        self.peer.lock().clone()
    }

    /// Wait until the open handshake completes (or the port closes).
    pub async fn wait_connected(&self) -> Result<(), SessionError> {
        let mut rx = self.state_rx.clone();
        loop {
            match *rx.borrow_and_update() {
                PortState::Connected => return Ok(()),
                PortState::Closed => return Err(SessionError::Closed),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(SessionError::Closed);
            }
        }
    }

    /// Whether the peer advertised a protocol, optionally at one of the
    /// given versions. Errors until the handshake has completed.
    pub fn supports_protocol(
        &self,
        name: &str,
        versions: Option<&[u32]>,
    ) -> Result<bool, SessionError> {
        let peer = self.peer().ok_or(SessionError::NotConnected)?;
        Ok(peer.configuration.supports_protocol(name, versions))
    }

    /// Open the port: store the endpoint, start the inbound dispatcher,
    /// and send the reserved open message carrying `configuration`.
    ///
    /// Callable at most once. Silently no-ops if the port was already
    /// closed before open was called (the remote may have closed first).
    pub fn open(
        self: &Arc<Self>,
        endpoint: Endpoint,
        configuration: SessionConfiguration,
    ) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock();
            match *state {
                PortState::Closed => return Ok(()),
                PortState::Unopened => *state = PortState::Opened,
                _ => return Err(SessionError::AlreadyOpened),
            }
        }
        let _ = self.state_tx.send(PortState::Opened);

        let endpoint = Arc::new(endpoint);
        let mut rx = endpoint
            .take_receiver()
            .ok_or(SessionError::AlreadyOpened)?;
        *self.endpoint.lock() = Some(Arc::clone(&endpoint));

        let body = serde_json::to_value(&configuration).ok();
        endpoint.post(Envelope::new(topics::SESSION_OPEN, body));

        let port = Arc::clone(self);
        let token = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(envelope) => port.dispatch(envelope).await,
                        None => {
                            // Remote endpoint dropped without a close message.
                            port.close_inner(false);
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// Send a fire-and-forget message. Returns whether the send succeeded
    /// (false once closed); errors if the port was never opened.
    pub fn send(
        &self,
        topic: impl Into<String>,
        body: Option<serde_json::Value>,
    ) -> Result<bool, SessionError> {
        match self.state() {
            PortState::Unopened => return Err(SessionError::NotOpened),
            PortState::Closed => return Ok(false),
            _ => {}
        }
        let endpoint = self.endpoint.lock().clone().ok_or(SessionError::NotOpened)?;
        Ok(endpoint.post(Envelope::new(topic, body)))
    }

    /// Send a request and await the correlated reply. Exactly one of the
    /// synthesized resolve/reject replies settles it; closing the port
    /// rejects it with `SessionError::Closed`.
    pub async fn request(
        &self,
        topic: impl Into<String>,
        body: Option<serde_json::Value>,
    ) -> HandlerResult {
        match self.state() {
            PortState::Unopened => return Err(SessionError::NotOpened),
            PortState::Closed => return Err(SessionError::Closed),
            _ => {}
        }
        let envelope = Envelope::request(topic, body);
        let id = envelope.id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);

        let endpoint = self.endpoint.lock().clone().ok_or(SessionError::NotOpened)?;
        if !endpoint.post(envelope) {
            self.pending.lock().remove(&id);
            return Err(SessionError::Closed);
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Closed),
        }
    }

    /// Report an error to the peer on the reserved error topic.
    pub fn send_error(&self, error: &RemoteError) -> Result<bool, SessionError> {
        self.send(topics::SESSION_ERROR, serde_json::to_value(error).ok())
    }

    /// Idempotent close: notifies the peer (when opened), closes the
    /// endpoint, rejects in-flight requests, and raises the close event
    /// exactly once no matter how many times or from which side close is
    /// triggered.
    pub fn close(&self) {
        self.close_inner(true);
    }

    fn close_inner(&self, notify_peer: bool) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            *state = PortState::Closed;
            previous
        };
        let _ = self.state_tx.send(PortState::Closed);

        let endpoint = self.endpoint.lock().clone();
        if let Some(endpoint) = &endpoint {
            if notify_peer && matches!(previous, PortState::Opened | PortState::Connected) {
                endpoint.post(Envelope::new(topics::SESSION_CLOSE, None));
            }
            endpoint.close();
        }
        self.cancel.cancel();

        let pending: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        for (_, tx) in pending {
            let _ = tx.send(Err(SessionError::Closed));
        }

        if !self.close_event_fired.swap(true, Ordering::SeqCst) {
            tracing::debug!(session_id = %self.id, label = %self.label, "session closed");
            let _ = self.close_tx.send(());
        }
    }

    /// Raise a local error event. With no listeners attached the error is
    /// funneled to the diagnostic log instead of vanishing.
    fn raise_error(&self, error: RemoteError) {
        if self.error_tx.receiver_count() == 0 {
            tracing::error!(
                session_id = %self.id,
                label = %self.label,
                message = %error.message,
                "session error (no listeners)"
            );
        } else {
            let _ = self.error_tx.send(error);
        }
    }

    async fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        if self.state() == PortState::Closed {
            return;
        }

        // Correlated replies for our outstanding requests.
        if let Some((_, raw_id)) = envelope.topic.split_once(":resolve:") {
            let id = MessageId::from_raw(raw_id);
            if let Some(tx) = self.pending.lock().remove(&id) {
                let _ = tx.send(Ok(envelope.body));
            } else {
                tracing::trace!(session_id = %self.id, id = %id, "stray resolve reply");
            }
            return;
        }
        if let Some((_, raw_id)) = envelope.topic.split_once(":reject:") {
            let id = MessageId::from_raw(raw_id);
            if let Some(tx) = self.pending.lock().remove(&id) {
                let remote = envelope
                    .body
                    .and_then(|b| serde_json::from_value(b).ok())
                    .unwrap_or_else(|| RemoteError::new("request rejected"));
                let _ = tx.send(Err(SessionError::Remote(remote)));
            } else {
                tracing::trace!(session_id = %self.id, id = %id, "stray reject reply");
            }
            return;
        }

        match envelope.topic.as_str() {
            topics::SESSION_OPEN => self.handle_session_open(envelope.body),
            topics::SESSION_CLOSE => self.close_inner(false),
            topics::SESSION_ERROR => {
                let remote = envelope
                    .body
                    .and_then(|b| serde_json::from_value(b).ok())
                    .unwrap_or_else(|| RemoteError::new("unknown remote error"));
                self.raise_error(remote);
            }
            _ => self.dispatch_user_topic(envelope).await,
        }
    }

    fn handle_session_open(&self, body: Option<serde_json::Value>) {
        let Some(body) = body else {
            self.raise_error(SessionError::MissingConfiguration.to_remote());
            return;
        };
        if self.peer.lock().is_some() {
            self.raise_error(SessionError::AlreadyConnected.to_remote());
            return;
        }
        let configuration: SessionConfiguration = match serde_json::from_value(body) {
            Ok(config) => config,
            Err(e) => {
                self.raise_error(RemoteError::new(format!("malformed session configuration: {e}")));
                return;
            }
        };
        let compat = ProtocolCompat::for_major(configuration.major_version());
        *self.peer.lock() = Some(Arc::new(PeerInfo {
            configuration: configuration.clone(),
            compat,
        }));
        self.set_state(PortState::Connected);
        tracing::debug!(
            session_id = %self.id,
            label = %self.label,
            role = ?configuration.role,
            "session connected"
        );
        let _ = self.connect_tx.send(configuration);
    }

    async fn dispatch_user_topic(&self, envelope: Envelope) {
        let handler = self.handlers.lock().get(&envelope.topic).cloned();
        let Some(handler) = handler else {
            if envelope.expects_response {
                let remote = SessionError::UnhandledTopic(envelope.topic.clone()).to_remote();
                self.post_reply(
                    topics::reject_topic(&envelope.topic, &envelope.id),
                    serde_json::to_value(&remote).ok(),
                );
            } else if !self.suppress_unknown_topics.load(Ordering::Relaxed) {
                self.raise_error(RemoteError::new(format!(
                    "unhandled topic: {}",
                    envelope.topic
                )));
            }
            return;
        };

        // Handler faults must never escape the dispatch loop: they become
        // a reject reply and/or a local error event. Local lifecycle
        // faults stay local; the peer only sees a generic rejection.
        let result = handler(envelope.body.clone()).await;
        if envelope.expects_response {
            match result {
                Ok(value) => {
                    self.post_reply(topics::resolve_topic(&envelope.topic, &envelope.id), value);
                }
                Err(error) => {
                    let remote = if error.is_local_fault() {
                        tracing::warn!(
                            session_id = %self.id,
                            topic = %envelope.topic,
                            kind = error.error_kind(),
                            "handler raised a local fault"
                        );
                        RemoteError::new("internal error")
                    } else {
                        error.to_remote()
                    };
                    self.post_reply(
                        topics::reject_topic(&envelope.topic, &envelope.id),
                        serde_json::to_value(remote).ok(),
                    );
                }
            }
        } else {
            match result {
                Ok(None) => {}
                Ok(Some(_)) => {
                    // Peer sent fire-and-forget but the handler produced a
                    // value: protocol violation, diagnostic only.
                    tracing::warn!(
                        session_id = %self.id,
                        topic = %envelope.topic,
                        "handler returned a value for a message expecting no response"
                    );
                }
                Err(error) => {
                    tracing::debug!(
                        session_id = %self.id,
                        topic = %envelope.topic,
                        kind = error.error_kind(),
                        "handler error on a fire-and-forget message"
                    );
                    self.raise_error(error.to_remote());
                }
            }
        }
    }

    fn post_reply(&self, topic: String, body: Option<serde_json::Value>) {
        if let Some(endpoint) = self.endpoint.lock().clone() {
            endpoint.post(Envelope::new(topic, body));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageChannel;
    use xrhub_core::session_config::Role;

    fn config(role: Role) -> SessionConfiguration {
        SessionConfiguration::new(role)
    }

    async fn open_pair() -> (Arc<SessionPort>, Arc<SessionPort>) {
        let (end_a, end_b) = MessageChannel::pair();
        let a = SessionPort::new("a");
        let b = SessionPort::new("b");
        a.open(end_a, config(Role::Application)).unwrap();
        b.open(end_b, config(Role::Manager)).unwrap();
        a.wait_connected().await.unwrap();
        b.wait_connected().await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn handshake_connects_both_sides() {
        // Scenario A: both ports reach Connected and observe the peer role.
        let (a, b) = open_pair().await;
        assert_eq!(a.state(), PortState::Connected);
        assert_eq!(b.state(), PortState::Connected);
        assert_eq!(a.peer().unwrap().configuration.role, Role::Manager);
        assert_eq!(b.peer().unwrap().configuration.role, Role::Application);
    }

    #[tokio::test]
    async fn open_at_most_once() {
        // P1: only the first open succeeds.
        let (end_a, _end_b) = MessageChannel::pair();
        let (end_c, _end_d) = MessageChannel::pair();
        let port = SessionPort::new("p1");
        port.open(end_a, config(Role::Application)).unwrap();
        let err = port.open(end_c, config(Role::Application)).unwrap_err();
        assert!(matches!(err, SessionError::AlreadyOpened));
    }

    #[tokio::test]
    async fn open_after_close_is_silent_noop() {
        let (end_a, _end_b) = MessageChannel::pair();
        let port = SessionPort::new("race");
        port.close();
        assert!(port.open(end_a, config(Role::Application)).is_ok());
        assert_eq!(port.state(), PortState::Closed);
    }

    #[tokio::test]
    async fn send_before_open_fails() {
        let port = SessionPort::new("unopened");
        let err = port.send("echo", None).unwrap_err();
        assert!(matches!(err, SessionError::NotOpened));
    }

    #[tokio::test]
    async fn send_after_close_returns_false() {
        let (a, _b) = open_pair().await;
        a.close();
        assert_eq!(a.send("echo", None).unwrap(), false);
    }

    #[tokio::test]
    async fn request_reply_roundtrip() {
        // Scenario B: request settles with the handler's value and no
        // pending entry remains.
        let (a, b) = open_pair().await;
        b.on("echo", |_body| async move { Ok(Some(serde_json::json!({"n": 2}))) });

        let reply = a.request("echo", Some(serde_json::json!({"n": 1}))).await;
        assert_eq!(reply.unwrap(), Some(serde_json::json!({"n": 2})));
        assert!(a.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn concurrent_requests_correlate_independently() {
        // P2: each of N outstanding requests settles with its own reply.
        let (a, b) = open_pair().await;
        b.on("double", |body| async move {
            let n = body.and_then(|b| b.get("n").and_then(|v| v.as_i64())).unwrap_or(0);
            Ok(Some(serde_json::json!({"n": n * 2})))
        });

        let mut tasks = Vec::new();
        for n in 0..16i64 {
            let a = Arc::clone(&a);
            tasks.push(tokio::spawn(async move {
                let reply = a
                    .request("double", Some(serde_json::json!({"n": n})))
                    .await
                    .unwrap()
                    .unwrap();
                (n, reply["n"].as_i64().unwrap())
            }));
        }
        for task in tasks {
            let (n, doubled) = task.await.unwrap();
            assert_eq!(doubled, n * 2);
        }
    }

    #[tokio::test]
    async fn request_rejected_by_handler_error() {
        let (a, b) = open_pair().await;
        b.on("fail", |_body| async move {
            Err(SessionError::PermissionDenied("not focused".into()))
        });
        let err = a.request("fail", None).await.unwrap_err();
        match err {
            SessionError::Remote(remote) => assert!(remote.message.contains("not focused")),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn local_fault_from_handler_does_not_leak_to_peer() {
        let (a, b) = open_pair().await;
        b.on("broken", |_body| async move { Err(SessionError::NotOpened) });
        let err = a.request("broken", None).await.unwrap_err();
        match err {
            SessionError::Remote(remote) => {
                assert_eq!(remote.message, "internal error");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_topic_with_response_rejects_naming_topic() {
        // P6: the rejection reason names the unhandled topic.
        let (a, _b) = open_pair().await;
        let err = a.request("no.such.topic", None).await.unwrap_err();
        match err {
            SessionError::Remote(remote) => assert!(remote.message.contains("no.such.topic")),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_topic_without_response_raises_local_error() {
        let (a, b) = open_pair().await;
        let mut errors = b.on_error();
        a.send("no.such.topic", None).unwrap();
        let error = errors.recv().await.unwrap();
        assert!(error.message.contains("no.such.topic"));
    }

    #[tokio::test]
    async fn unknown_topic_error_can_be_suppressed() {
        let (a, b) = open_pair().await;
        b.set_suppress_unknown_topics(true);
        let mut errors = b.on_error();
        a.send("optional.topic", None).unwrap();
        // Give dispatch a chance to run; no error event should arrive.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fires_once() {
        // P3: close event fires exactly once across repeated closes.
        let (a, _b) = open_pair().await;
        let mut closes = a.on_close();
        a.close();
        a.close();
        a.close();
        closes.recv().await.unwrap();
        assert!(closes.try_recv().is_err());
        assert_eq!(a.state(), PortState::Closed);
    }

    #[tokio::test]
    async fn remote_close_propagates() {
        let (a, b) = open_pair().await;
        let mut closes = b.on_close();
        a.close();
        closes.recv().await.unwrap();
        assert_eq!(b.state(), PortState::Closed);
    }

    #[tokio::test]
    async fn close_rejects_pending_requests() {
        let (a, _b) = open_pair().await;
        // No handler on the peer will ever reply to this topic, but we
        // close before the unhandled-topic rejection matters.
        let a2 = Arc::clone(&a);
        let pending = tokio::spawn(async move { a2.request("never.replied", None).await });
        tokio::task::yield_now().await;
        a.close();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::Closed | SessionError::Remote(_)));
    }

    #[tokio::test]
    async fn session_error_without_listeners_does_not_panic() {
        // Scenario E: a SESSION_ERROR with no error listeners must not
        // escape the dispatch loop.
        let (a, b) = open_pair().await;
        a.send_error(&RemoteError::new("synthetic failure")).unwrap();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(b.state(), PortState::Connected);
    }

    #[tokio::test]
    async fn session_error_reaches_listener() {
        let (a, b) = open_pair().await;
        let mut errors = b.on_error();
        a.send_error(&RemoteError::new("bad frame")).unwrap();
        let error = errors.recv().await.unwrap();
        assert_eq!(error.message, "bad frame");
    }

    #[tokio::test]
    async fn supports_protocol_requires_connection() {
        let port = SessionPort::new("lonely");
        assert!(matches!(
            port.supports_protocol("x", None),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn supports_protocol_consults_peer_config() {
        let (end_a, end_b) = MessageChannel::pair();
        let a = SessionPort::new("a");
        let b = SessionPort::new("b");
        let mut peer_config = config(Role::RealityViewer);
        peer_config.protocols = vec!["x@v1".into(), "x@v2".into()];
        a.open(end_a, config(Role::Manager)).unwrap();
        b.open(end_b, peer_config).unwrap();
        a.wait_connected().await.unwrap();
        assert!(a.supports_protocol("x", Some(&[2])).unwrap());
        assert!(!a.supports_protocol("x", Some(&[3])).unwrap());
        assert!(!a.supports_protocol("y", None).unwrap());
    }

    #[tokio::test]
    async fn last_handler_wins() {
        let (a, b) = open_pair().await;
        b.on("pick", |_body| async move { Ok(Some(serde_json::json!("first"))) });
        b.on("pick", |_body| async move { Ok(Some(serde_json::json!("second"))) });
        let reply = a.request("pick", None).await.unwrap();
        assert_eq!(reply, Some(serde_json::json!("second")));
    }

    #[tokio::test]
    async fn peer_without_version_defaults_to_zero() {
        let (end_a, end_b) = MessageChannel::pair();
        let a = SessionPort::new("a");
        let b = SessionPort::new("b");
        let mut legacy = config(Role::Application);
        legacy.version = None;
        a.open(end_a, config(Role::Manager)).unwrap();
        b.open(end_b, legacy).unwrap();
        a.wait_connected().await.unwrap();
        let peer = a.peer().unwrap();
        assert_eq!(peer.configuration.major_version(), 0);
        // The compatibility shim is selected from the peer version once,
        // at connect time.
        assert!(peer.compat.legacy);
    }
}
