use serde::{Deserialize, Serialize};

/// Wire shape for errors crossing a session boundary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}

/// Typed error hierarchy for the session layer.
///
/// Local lifecycle misuse is a programming fault raised synchronously and
/// never sent over the wire; remote errors are reconstructed from the
/// `{message, stack?}` wire shape and are always recoverable.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SessionError {
    // Local programming faults
    #[error("session port already opened")]
    AlreadyOpened,
    #[error("session port not opened")]
    NotOpened,
    #[error("session port closed")]
    Closed,
    #[error("session not connected")]
    NotConnected,

    // Protocol violations reported by the peer's handshake
    #[error("session open message is missing its configuration")]
    MissingConfiguration,
    #[error("session already connected")]
    AlreadyConnected,

    // Authorization failures
    #[error("operation requires the {0} role")]
    WrongRole(&'static str),
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // Remote-reported
    #[error("unhandled topic: {0}")]
    UnhandledTopic(String),
    #[error("{}", .0.message)]
    Remote(RemoteError),
}

impl SessionError {
    /// Whether this error may be surfaced to the peer as a reject reply.
    /// Lifecycle misuse stays local.
    pub fn is_local_fault(&self) -> bool {
        matches!(
            self,
            Self::AlreadyOpened | Self::NotOpened | Self::Closed | Self::NotConnected
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AlreadyOpened => "already_opened",
            Self::NotOpened => "not_opened",
            Self::Closed => "closed",
            Self::NotConnected => "not_connected",
            Self::MissingConfiguration => "missing_configuration",
            Self::AlreadyConnected => "already_connected",
            Self::WrongRole(_) => "wrong_role",
            Self::PermissionDenied(_) => "permission_denied",
            Self::UnhandledTopic(_) => "unhandled_topic",
            Self::Remote(_) => "remote",
        }
    }

    /// Wire shape for sending this error to the peer.
    pub fn to_remote(&self) -> RemoteError {
        match self {
            Self::Remote(remote) => remote.clone(),
            other => RemoteError::new(other.to_string()),
        }
    }
}

impl From<RemoteError> for SessionError {
    fn from(remote: RemoteError) -> Self {
        Self::Remote(remote)
    }
}

/// Errors from the reality viewer lifecycle and arbitration service.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RealityError {
    #[error("no reality viewer installed for {0}")]
    NotInstalled(String),
    #[error("reality viewer {0} is still in use")]
    StillInUse(String),
    #[error("unsupported reality viewer type: {0}")]
    UnsupportedType(String),
    #[error("reality viewer {0} destroyed")]
    Destroyed(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl RealityError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotInstalled(_) => "not_installed",
            Self::StillInUse(_) => "still_in_use",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::Destroyed(_) => "destroyed",
            Self::Session(e) => e.error_kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_fault_classification() {
        assert!(SessionError::AlreadyOpened.is_local_fault());
        assert!(SessionError::NotOpened.is_local_fault());
        assert!(SessionError::Closed.is_local_fault());
        assert!(!SessionError::UnhandledTopic("echo".into()).is_local_fault());
        assert!(!SessionError::MissingConfiguration.is_local_fault());
    }

    #[test]
    fn remote_error_roundtrips_wire_shape() {
        let remote = RemoteError {
            message: "handler failed".into(),
            stack: Some("at dispatch".into()),
        };
        let json = serde_json::to_string(&remote).unwrap();
        let parsed: RemoteError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.message, "handler failed");
        assert_eq!(parsed.stack.as_deref(), Some("at dispatch"));
    }

    #[test]
    fn stack_is_optional_on_the_wire() {
        let parsed: RemoteError = serde_json::from_str(r#"{"message":"boom"}"#).unwrap();
        assert!(parsed.stack.is_none());
    }

    #[test]
    fn to_remote_preserves_message() {
        let err = SessionError::UnhandledTopic("ar.reality.request".into());
        let remote = err.to_remote();
        assert!(remote.message.contains("ar.reality.request"));
    }

    #[test]
    fn unhandled_topic_names_the_topic() {
        // P6: a rejection for an unknown topic must name it.
        let err = SessionError::UnhandledTopic("echo".into());
        assert!(err.to_string().contains("echo"));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(SessionError::Closed.error_kind(), "closed");
        assert_eq!(
            RealityError::StillInUse("reality:empty".into()).error_kind(),
            "still_in_use"
        );
    }
}
