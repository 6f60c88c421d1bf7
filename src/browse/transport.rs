//! Transport seam
//!
//! The session engine only talks to the remote host through this trait.
//! Host, credentials and timeouts are bound into the implementation.

use async_trait::async_trait;
use thiserror::Error;

use super::types::DirectoryListing;

/// Failure of a single transport call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Disconnected")]
    Disconnected,

    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl TransportError {
    /// The underlying link is gone and must be reopened
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Timeout(_) | TransportError::Disconnected
        )
    }
}

impl serde::Serialize for TransportError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Remote directory access used by a browse session
#[async_trait]
pub trait BrowseTransport: Send + Sync {
    /// List `path`. Entries, resolved path and latency come back together.
    async fn list_directories(&self, path: &str) -> Result<DirectoryListing, TransportError>;

    /// Lightweight liveness check against `path`
    async fn ping(&self, path: &str) -> Result<(), TransportError>;

    /// Release connection resources held on behalf of `owner_id`
    async fn invalidate(&self, owner_id: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_classification() {
        assert!(TransportError::Disconnected.is_connection_loss());
        assert!(TransportError::Timeout("readdir".into()).is_connection_loss());
        assert!(!TransportError::Auth("denied".into()).is_connection_loss());
        assert!(!TransportError::Protocol("no such file".into()).is_connection_loss());
    }

    #[test]
    fn test_serializes_as_message() {
        let json = serde_json::to_string(&TransportError::Timeout("5s".into())).unwrap();
        assert_eq!(json, "\"Timeout: 5s\"");
    }
}
