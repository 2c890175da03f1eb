//! Legacy peer compatibility.
//!
//! Peers below protocol major version 2 use the old `ar.context.*` topic
//! names for entity subscriptions and `ar.reality.desired` instead of
//! `ar.reality.request`. The shim is selected once at connect time from the
//! peer's advertised version and cached on its peer info, so callers never
//! branch on version numbers at send sites.

use xrhub_core::topics;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolCompat {
    pub legacy: bool,
    pub entity_subscribe: &'static str,
    pub entity_unsubscribe: &'static str,
    pub reality_request: &'static str,
}

impl ProtocolCompat {
    /// Select the shim for a peer's major protocol version.
    pub fn for_major(major: u32) -> Self {
        if major < 2 {
            Self {
                legacy: true,
                entity_subscribe: topics::CONTEXT_SUBSCRIBE,
                entity_unsubscribe: topics::CONTEXT_UNSUBSCRIBE,
                reality_request: topics::REALITY_DESIRED,
            }
        } else {
            Self {
                legacy: false,
                entity_subscribe: topics::ENTITY_SUBSCRIBE,
                entity_unsubscribe: topics::ENTITY_UNSUBSCRIBE,
                reality_request: topics::REALITY_REQUEST,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v0_peer_gets_legacy_topics() {
        let compat = ProtocolCompat::for_major(0);
        assert!(compat.legacy);
        assert_eq!(compat.entity_subscribe, "ar.context.subscribe");
        assert_eq!(compat.reality_request, "ar.reality.desired");
    }

    #[test]
    fn v1_peer_gets_legacy_topics() {
        assert!(ProtocolCompat::for_major(1).legacy);
    }

    #[test]
    fn v2_peer_gets_current_topics() {
        let compat = ProtocolCompat::for_major(2);
        assert!(!compat.legacy);
        assert_eq!(compat.entity_subscribe, "ar.entity.subscribe");
        assert_eq!(compat.reality_request, "ar.reality.request");
    }
}
