use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use xrhub_core::errors::{RemoteError, SessionError};
use xrhub_core::ids::SessionId;
use xrhub_core::topics;
use xrhub_session::manager::SessionManager;
use xrhub_session::port::SessionPort;

use crate::permission::PermissionService;

/// Session-scoped entity subscription bookkeeping. Subscriptions are
/// permission-gated and cleaned up when their session closes.
///
/// Legacy peers (major version < 2) use the `ar.context.*` topic names;
/// both aliases are answered so the shim stays one-sided.
pub struct EntitySubscriptionService {
    manager: Arc<SessionManager>,
    permissions: Arc<PermissionService>,
    subscriptions: Mutex<HashMap<SessionId, HashSet<String>>>,
}

impl EntitySubscriptionService {
    pub fn new(manager: Arc<SessionManager>, permissions: Arc<PermissionService>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            permissions,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    pub fn subscriptions_for(&self, session_id: &SessionId) -> HashSet<String> {
        self.subscriptions
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every session subscribed to an entity, for fan-out by the data layer.
    pub fn subscribers_of(&self, entity_id: &str) -> Vec<SessionId> {
        self.subscriptions
            .lock()
            .iter()
            .filter(|(_, set)| set.contains(entity_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn subscribe(&self, session_id: &SessionId, entity_id: &str) -> Result<(), SessionError> {
        if !self.permissions.check(session_id, topics::ENTITY_SUBSCRIBE) {
            return Err(SessionError::PermissionDenied(format!(
                "entity subscription denied for {entity_id}"
            )));
        }
        self.subscriptions
            .lock()
            .entry(session_id.clone())
            .or_default()
            .insert(entity_id.to_owned());
        tracing::debug!(session_id = %session_id, entity_id, "entity subscribed");
        Ok(())
    }

    fn unsubscribe(&self, session_id: &SessionId, entity_id: &str) {
        if let Some(set) = self.subscriptions.lock().get_mut(session_id) {
            set.remove(entity_id);
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
        for topic in [topics::ENTITY_SUBSCRIBE, topics::CONTEXT_SUBSCRIBE] {
            let service = Arc::clone(self);
            let sid = session.id.clone();
            session.on(topic, move |body| {
                let service = Arc::clone(&service);
                let sid = sid.clone();
                async move {
                    for entity_id in entity_ids(&body)? {
                        service.subscribe(&sid, &entity_id)?;
                    }
                    Ok(None)
                }
            });
        }

        for topic in [topics::ENTITY_UNSUBSCRIBE, topics::CONTEXT_UNSUBSCRIBE] {
            let service = Arc::clone(self);
            let sid = session.id.clone();
            session.on(topic, move |body| {
                let service = Arc::clone(&service);
                let sid = sid.clone();
                async move {
                    for entity_id in entity_ids(&body)? {
                        service.unsubscribe(&sid, &entity_id);
                    }
                    Ok(None)
                }
            });
        }

        let service = Arc::clone(self);
        let session_id = session.id.clone();
        let mut closes = session.on_close();
        tokio::spawn(async move {
            let _ = closes.recv().await;
            service.subscriptions.lock().remove(&session_id);
        });
    }
}

/// Accepts `{"id": "..."}` or `{"ids": ["..."]}`.
fn entity_ids(body: &Option<serde_json::Value>) -> Result<Vec<String>, SessionError> {
    let body = body.as_ref().ok_or_else(missing_id)?;
    if let Some(id) = body.get("id").and_then(|v| v.as_str()) {
        return Ok(vec![id.to_owned()]);
    }
    if let Some(ids) = body.get("ids").and_then(|v| v.as_array()) {
        return ids
            .iter()
            .map(|v| v.as_str().map(str::to_owned).ok_or_else(missing_id))
            .collect();
    }
    Err(missing_id())
}

fn missing_id() -> SessionError {
    SessionError::Remote(RemoteError::new("missing required parameter: id or ids"))
}
