//! Reserved topic names.
//!
//! These are wire literals shared with existing peers and must not change.

use crate::ids::{MessageId, RelayId};

// Session handshake
pub const SESSION_OPEN: &str = "ar.session.open";
pub const SESSION_CLOSE: &str = "ar.session.close";
pub const SESSION_ERROR: &str = "ar.session.error";

// Reality arbitration
pub const REALITY_INSTALL: &str = "ar.reality.install";
pub const REALITY_UNINSTALL: &str = "ar.reality.uninstall";
pub const REALITY_REQUEST: &str = "ar.reality.request";
/// Legacy name for `ar.reality.request`, used by v0/v1 peers.
pub const REALITY_DESIRED: &str = "ar.reality.desired";
pub const REALITY_CONNECT: &str = "ar.reality.connect";
pub const REALITY_FRAME_STATE: &str = "ar.reality.frameState";

// Auxiliary arbitration
pub const FOCUS_STATE: &str = "ar.focus.state";
pub const VISIBILITY_STATE: &str = "ar.visibility.state";
pub const VIEWPORT_PRESENTATION_MODE: &str = "ar.viewport.presentationMode";
pub const VIEWPORT_REQUEST_PRESENTATION_MODE: &str = "ar.viewport.requestPresentationMode";
pub const VIEWPORT_EMBEDDED: &str = "ar.viewport.embeddedViewport";
pub const VIEWPORT_UIEVENT: &str = "ar.viewport.uievent";
pub const VIEWPORT_FORWARD_UIEVENT: &str = "ar.viewport.forwardUIEvent";

// Entity subscriptions (ar.context.* are the legacy aliases)
pub const ENTITY_SUBSCRIBE: &str = "ar.entity.subscribe";
pub const ENTITY_UNSUBSCRIBE: &str = "ar.entity.unsubscribe";
pub const CONTEXT_SUBSCRIBE: &str = "ar.context.subscribe";
pub const CONTEXT_UNSUBSCRIBE: &str = "ar.context.unsubscribe";

// Permissions
pub const PERMISSION_QUERY: &str = "ar.permission.query";
pub const PERMISSION_REVOKE: &str = "ar.permission.revoke";

/// Reply topic for a resolved request.
pub fn resolve_topic(topic: &str, id: &MessageId) -> String {
    format!("{topic}:resolve:{id}")
}

/// Reply topic for a rejected request.
pub fn reject_topic(topic: &str, id: &MessageId) -> String {
    format!("{topic}:reject:{id}")
}

/// Per-relay dynamic topics brokered by the manager.
pub fn relay_route(id: &RelayId) -> String {
    format!("ar.reality.message.route.{id}")
}

pub fn relay_send(id: &RelayId) -> String {
    format!("ar.reality.message.send.{id}")
}

pub fn relay_close(id: &RelayId) -> String {
    format!("ar.reality.close.{id}")
}
