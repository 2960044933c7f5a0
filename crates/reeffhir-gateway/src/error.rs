//! Error taxonomy for document-cluster backends.
//!
//! The split that matters to the circuit breaker is connectivity-class
//! versus result-set: only the former may open the circuit.

use reeffhir_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Ambiguous timeout: the request may or may not have been applied.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The connection to the cluster was lost mid-call.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A node or service (KV / query / search) is unavailable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The request was canceled after submission.
    #[error("Request canceled: {0}")]
    Canceled(String),

    /// KV get/replace/remove on an absent key.
    #[error("Document not found: {key}")]
    DocumentNotFound { key: String },

    /// KV insert on an existing key.
    #[error("Document already exists: {key}")]
    DocumentExists { key: String },

    /// Optimistic-concurrency failure on replace/remove.
    #[error("CAS mismatch: {key}")]
    CasMismatch { key: String },

    /// Statement rejected by the query service.
    #[error("Query syntax error: {0}")]
    QuerySyntax(String),

    /// FTS index does not exist.
    #[error("Search index not found: {0}")]
    IndexNotFound(String),

    /// A transaction could not commit and was rolled back.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Anything else the backend cannot classify.
    #[error("Cluster error: {0}")]
    Internal(String),
}

impl ClusterError {
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Self::ConnectionLost(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn document_not_found(key: impl Into<String>) -> Self {
        Self::DocumentNotFound { key: key.into() }
    }

    pub fn document_exists(key: impl Into<String>) -> Self {
        Self::DocumentExists { key: key.into() }
    }

    pub fn cas_mismatch(key: impl Into<String>) -> Self {
        Self::CasMismatch { key: key.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Connectivity-class errors open (or keep open) the circuit. Result-set
    /// errors never do.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::ConnectionLost(_)
                | Self::ServiceUnavailable(_)
                | Self::Canceled(_)
        )
    }
}

impl From<ClusterError> for CoreError {
    fn from(err: ClusterError) -> Self {
        match err {
            e if e.is_connectivity() => CoreError::database_unavailable(e.to_string()),
            ClusterError::DocumentNotFound { key } => match key.split_once('/') {
                Some((t, rest)) => CoreError::not_found(t, rest),
                None => CoreError::not_found("Document", key),
            },
            ClusterError::DocumentExists { key } | ClusterError::CasMismatch { key } => {
                match key.split_once('/') {
                    Some((t, rest)) => CoreError::conflict(t, rest, "write conflict"),
                    None => CoreError::conflict("Document", key, "write conflict"),
                }
            }
            ClusterError::TransactionFailed(msg) => {
                CoreError::conflict("Transaction", "-", msg)
            }
            other => CoreError::internal(other.to_string()),
        }
    }
}
