use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque pose value exchanged with the spatial layer.
///
/// Short serde keys (`p`/`o`/`r`) match the wire format existing peers
/// produce. The core never interprets the coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position, as the spatial layer serialized it.
    pub p: serde_json::Value,
    /// Orientation.
    pub o: serde_json::Value,
    /// Reference frame identifier.
    pub r: serde_json::Value,
}

/// Per-frame state published by a presenting reality viewer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameState {
    /// URI of the viewer that produced this frame. Tagged by the manager
    /// before fan-out so receivers can drop frames from a stale source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reality: Option<String>,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<Pose>,
    /// Viewer-specific payload (subviews, entity snapshots) passed through
    /// untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
}

impl FrameState {
    pub fn now() -> Self {
        Self {
            reality: None,
            time: Utc::now(),
            pose: None,
            state: None,
        }
    }
}
