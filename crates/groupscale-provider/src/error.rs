//! Error types for provider access.

use thiserror::Error;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors reported by the cloud provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The requested resource does not exist (or no longer exists).
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The request never completed: network, auth or server failure.
    #[error("provider transport error: {0}")]
    Transport(String),

    /// The provider received the request and refused it.
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

impl ProviderError {
    pub fn group_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "group",
            id: id.to_string(),
        }
    }

    pub fn instance_not_found(id: &str) -> Self {
        Self::NotFound {
            kind: "instance",
            id: id.to_string(),
        }
    }

    /// Whether this error means the resource is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
