use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use xrhub_core::errors::{RemoteError, SessionError};
use xrhub_core::ids::SessionId;
use xrhub_core::topics;
use xrhub_session::manager::SessionManager;
use xrhub_session::port::SessionPort;

/// Decides whether a session may use a resource. The host supplies the
/// policy; revocations recorded at runtime override it.
pub trait PermissionPolicy: Send + Sync {
    fn query(&self, session_id: &SessionId, resource: &str) -> bool;
}

/// Default policy: everything is permitted.
pub struct AllowAll;

impl PermissionPolicy for AllowAll {
    fn query(&self, _session_id: &SessionId, _resource: &str) -> bool {
        true
    }
}

/// Answers `ar.permission.query` and records `ar.permission.revoke` per
/// session. Revocations are dropped when their session closes.
pub struct PermissionService {
    manager: Arc<SessionManager>,
    policy: Mutex<Arc<dyn PermissionPolicy>>,
    revoked: Mutex<HashMap<SessionId, HashSet<String>>>,
}

impl PermissionService {
    pub fn new(manager: Arc<SessionManager>) -> Arc<Self> {
        Arc::new(Self {
            manager,
            policy: Mutex::new(Arc::new(AllowAll)),
            revoked: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_policy(&self, policy: Arc<dyn PermissionPolicy>) {
        *self.policy.lock() = policy;
    }

    /// The effective decision: revoked always wins over the policy.
    pub fn check(&self, session_id: &SessionId, resource: &str) -> bool {
        let revoked = self
            .revoked
            .lock()
            .get(session_id)
            .map(|set| set.contains(resource))
            .unwrap_or(false);
        if revoked {
            return false;
        }
        self.policy.lock().query(session_id, resource)
    }

    pub fn revoke(&self, session_id: &SessionId, resource: &str) {
        tracing::info!(session_id = %session_id, resource, "permission revoked");
        self.revoked
            .lock()
            .entry(session_id.clone())
            .or_default()
            .insert(resource.to_owned());
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
        let sid = session.id.clone();
        session.on(topics::PERMISSION_QUERY, move |body| {
            let service = Arc::clone(&service);
            let sid = sid.clone();
            async move {
                let resource = required_resource(&body)?;
                let granted = service.check(&sid, &resource);
                Ok(Some(serde_json::json!({ "granted": granted })))
            }
        });

        let service = Arc::clone(self);
        let sid = session.id.clone();
        session.on(topics::PERMISSION_REVOKE, move |body| {
            let service = Arc::clone(&service);
            let sid = sid.clone();
            async move {
                let resource = required_resource(&body)?;
                service.revoke(&sid, &resource);
                Ok(None)
            }
        });

        // Revocations are per-session state; drop them with the session.
        let service = Arc::clone(self);
        let session_id = session.id.clone();
        let mut closes = session.on_close();
        tokio::spawn(async move {
            let _ = closes.recv().await;
            service.revoked.lock().remove(&session_id);
        });
    }
}

fn required_resource(body: &Option<serde_json::Value>) -> Result<String, SessionError> {
    body.as_ref()
        .and_then(|b| b.get("resource"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            SessionError::Remote(RemoteError::new("missing required parameter: resource"))
        })
}
