use std::collections::HashSet;
use std::sync::Arc;

use xrhub_core::ids::RelayId;
use xrhub_core::session_config::Role;
use xrhub_core::topics;
use xrhub_session::manager::SessionManager;
use xrhub_session::port::SessionPort;

/// Whether a managed session is a reality viewer that speaks custom
/// protocols (and so needs the manager to relay for it).
pub fn custom_protocol_viewer(session: &Arc<SessionPort>) -> bool {
    session
        .peer()
        .map(|peer| {
            peer.configuration.role == Role::RealityViewer
                && peer.configuration.supports_custom_protocols
        })
        .unwrap_or(false)
}

/// Pair a newly connected custom-protocol viewer session with every other
/// managed session, each pair over its own relay, and keep pairing as
/// further sessions connect while the viewer is alive. The viewer never
/// sees the other parties; the manager brokers every pair.
pub fn wire_relays(manager: &Arc<SessionManager>, viewer: &Arc<SessionPort>) {
    // Subscribe before snapshotting so no connect slips between the two;
    // the paired set drops the overlap.
    let mut connects = manager.on_managed_connect();
    let mut paired = HashSet::new();
    for other in manager.managed_sessions() {
        if other.id == viewer.id {
            continue;
        }
        create_relay(viewer, &other);
        paired.insert(other.id.clone());
    }

    let weak = Arc::downgrade(viewer);
    let mut closes = viewer.on_close();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = closes.recv() => break,
                session = connects.recv() => {
                    let Ok(session) = session else { break };
                    let Some(viewer) = weak.upgrade() else { break };
                    if session.id == viewer.id || paired.contains(&session.id) {
                        continue;
                    }
                    // A late custom-protocol viewer runs its own pairing
                    // pass; wiring it here too would double the relay.
                    if custom_protocol_viewer(&session) {
                        continue;
                    }
                    create_relay(&viewer, &session);
                }
            }
        }
    });
}

/// Broker a bidirectional relay between two managed sessions.
///
/// Each side is told the relay id on `ar.reality.connect`; whatever it
/// sends on its per-relay send topic is delivered to the counterpart on
/// the matching route topic. A relay-close from either side, or either
/// session closing, closes the relay on the other.
pub fn create_relay(a: &Arc<SessionPort>, b: &Arc<SessionPort>) -> RelayId {
    let id = RelayId::new();
    wire_side(&id, a, b);
    wire_side(&id, b, a);
    tracing::debug!(relay_id = %id, a = %a.id, b = %b.id, "relay created");

    let body = serde_json::json!({ "id": id });
    let _ = a.send(topics::REALITY_CONNECT, Some(body.clone()));
    let _ = b.send(topics::REALITY_CONNECT, Some(body));
    id
}

fn wire_side(id: &RelayId, from: &Arc<SessionPort>, to: &Arc<SessionPort>) {
    let route = topics::relay_route(id);
    let counterpart = Arc::downgrade(to);
    from.on(topics::relay_send(id), move |body| {
        let route = route.clone();
        let counterpart = counterpart.clone();
        async move {
            if let Some(to) = counterpart.upgrade() {
                let _ = to.send(route, body);
            }
            Ok(None)
        }
    });

    let close_topic = topics::relay_close(id);
    let counterpart = Arc::downgrade(to);
    let origin = Arc::downgrade(from);
    let send_topic = topics::relay_send(id);
    let close_for_handler = close_topic.clone();
    from.on(close_topic.clone(), move |_body| {
        let counterpart = counterpart.clone();
        let origin = origin.clone();
        let send_topic = send_topic.clone();
        let close_topic = close_for_handler.clone();
        async move {
            if let Some(to) = counterpart.upgrade() {
                to.remove_handler(&send_topic);
                to.remove_handler(&close_topic);
                let _ = to.send(close_topic.clone(), None);
            }
            if let Some(from) = origin.upgrade() {
                from.remove_handler(&send_topic);
                from.remove_handler(&close_topic);
            }
            Ok(None)
        }
    });

    // Either session closing closes the relay on the survivor, dropping
    // its relay handlers so they do not pile up over the port's lifetime.
    let counterpart = Arc::downgrade(to);
    let send_topic = topics::relay_send(id);
    let mut closes = from.on_close();
    tokio::spawn(async move {
        if closes.recv().await.is_ok() {
            if let Some(to) = counterpart.upgrade() {
                to.remove_handler(&send_topic);
                to.remove_handler(&close_topic);
                let _ = to.send(close_topic, None);
            }
        }
    });
}
