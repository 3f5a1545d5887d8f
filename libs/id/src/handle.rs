//! Handles for remote cloud resources.

use std::fmt;

use serde::Serialize;

/// The kind of remote resource a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Server,
    Job,
    Volume,
    Network,
    Subnet,
    Address,
    Keypair,
    Image,
}

impl ResourceKind {
    /// Stable lowercase name, as used in logs and manifests.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Server => "server",
            ResourceKind::Job => "job",
            ResourceKind::Volume => "volume",
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Address => "address",
            ResourceKind::Keypair => "keypair",
            ResourceKind::Image => "image",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a single remote resource instance.
///
/// The identifier is opaque and provider-assigned. An empty identifier means
/// the resource has not been created yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceHandle {
    kind: ResourceKind,
    id: String,
}

impl ResourceHandle {
    /// A handle for a resource that exists remotely.
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when the handle names a created resource.
    pub fn is_live(&self) -> bool {
        !self.id.is_empty()
    }

    /// Returns the identifier if the handle is live.
    pub fn live_id(&self) -> Option<&str> {
        self.is_live().then_some(self.id.as_str())
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_live() {
            write!(f, "{} {}", self.kind, self.id)
        } else {
            write!(f, "{} <not created>", self.kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_id_is_not_live() {
        let handle = ResourceHandle::new(ResourceKind::Server, "");
        assert!(!handle.is_live());
        assert_eq!(handle.live_id(), None);
        assert_eq!(handle.to_string(), "server <not created>");
    }

    #[test]
    fn test_live_handle() {
        let handle = ResourceHandle::new(ResourceKind::Volume, "vol-1");
        assert!(handle.is_live());
        assert_eq!(handle.live_id(), Some("vol-1"));
        assert_eq!(handle.kind(), ResourceKind::Volume);
        assert_eq!(handle.to_string(), "volume vol-1");
    }

    #[test]
    fn test_handle_json() {
        let handle = ResourceHandle::new(ResourceKind::Address, "eip-7");
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, r#"{"kind":"address","id":"eip-7"}"#);
    }
}
