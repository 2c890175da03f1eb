use serde::{Deserialize, Serialize};

/// Role a session declares when it opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Application,
    RealityViewer,
    Manager,
}

/// Configuration negotiated at open time. Immutable once sent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfiguration {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Protocol version triple. Peers that omit it are treated as `[0]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Vec<u32>>,
    /// Supported protocol strings, each optionally suffixed `@v<N>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub supports_custom_viewport: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub supports_custom_protocols: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub shared_canvas: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<serde_json::Value>,
}

fn is_false(b: &bool) -> bool {
    !b
}

impl SessionConfiguration {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            name: None,
            title: None,
            version: Some(vec![2, 0, 0]),
            protocols: Vec::new(),
            supports_custom_viewport: false,
            supports_custom_protocols: false,
            shared_canvas: false,
            user_data: None,
        }
    }

    /// Effective protocol version; `[0]` when the peer advertised none.
    pub fn effective_version(&self) -> Vec<u32> {
        match &self.version {
            Some(v) if !v.is_empty() => v.clone(),
            _ => vec![0],
        }
    }

    pub fn major_version(&self) -> u32 {
        self.effective_version()[0]
    }

    /// Whether the peer advertised a protocol, optionally at one of the
    /// given versions. With no filter, presence alone implies support. A
    /// bare protocol string (no `@v` suffix) advertises version 0.
    pub fn supports_protocol(&self, name: &str, versions: Option<&[u32]>) -> bool {
        let advertised: Vec<u32> = self
            .protocols
            .iter()
            .filter_map(|p| parse_protocol(p))
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .collect();
        if advertised.is_empty() {
            return false;
        }
        match versions {
            None => true,
            Some(wanted) => advertised.iter().any(|v| wanted.contains(v)),
        }
    }
}

/// Split `name@v<N>` into `(name, N)`; a missing suffix means version 0.
fn parse_protocol(s: &str) -> Option<(&str, u32)> {
    match s.rsplit_once("@v") {
        Some((name, version)) => {
            let version = version.parse().ok()?;
            Some((name, version))
        }
        None => Some((s, 0)),
    }
}
