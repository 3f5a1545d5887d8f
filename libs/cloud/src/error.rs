//! Cloud API errors.

use kiln_id::ResourceKind;
use thiserror::Error;

/// Errors returned by cloud collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// The resource does not exist (HTTP 404). Cleanups treat this as done.
    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: String },

    /// The resource cannot be changed yet, usually because dependants still
    /// exist (HTTP 409).
    #[error("{kind} {id} is in use: {message}")]
    Conflict {
        kind: ResourceKind,
        id: String,
        message: String,
    },

    /// Any other error response from the API.
    #[error("cloud API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),
}

impl CloudError {
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        CloudError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn api(status: u16, message: impl Into<String>) -> Self {
        CloudError::Api {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CloudError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = CloudError::not_found(ResourceKind::Server, "srv-1");
        assert_eq!(err.to_string(), "server srv-1 not found");
        assert!(err.is_not_found());

        let err = CloudError::api(500, "internal error");
        assert_eq!(err.to_string(), "cloud API error (500): internal error");
        assert!(!err.is_not_found());
    }
}
