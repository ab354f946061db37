//! Error types for the data request pipeline.

use crate::request::model::RequestStatus;
use crate::types::{ContextId, RequestId, UserId};
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    /// Building an export archive failed; retrying gives the same result
    #[error("Export packaging error: {0}")]
    Packaging(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(io) => StorageError::IoError(io),
            other => StorageError::Database(other.to_string()),
        }
    }
}

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PrivacyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("Invalid subject user {0}: user or user context does not exist")]
    InvalidSubject(UserId),

    #[error("Context {context} approved for {component} is no longer discoverable for the subject")]
    ApprovalExceedsDiscovery { component: String, context: ContextId },

    #[error("Request {request} cannot move from {from} to {to}")]
    InvalidTransition {
        request: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("User {subject} already has an ongoing {kind} request")]
    OngoingRequest { subject: UserId, kind: String },

    #[error("Provider {component} failed during {operation}: {source}")]
    Provider {
        component: String,
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Export writer collision on {component} in context {context}: {path}")]
    WriterCollision {
        component: String,
        context: ContextId,
        path: String,
    },

    #[error("Component {component} wrote to context {context} outside its approved list")]
    ContextNotApproved { component: String, context: ContextId },

    #[error("Duplicate component: {0}")]
    DuplicateComponent(String),

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl PrivacyError {
    /// Transient failures the task queue may retry on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PrivacyError::Storage(StorageError::IoError(_)))
    }

    /// Component that caused the failure, when one is known.
    pub fn component(&self) -> Option<&str> {
        match self {
            PrivacyError::Provider { component, .. }
            | PrivacyError::WriterCollision { component, .. }
            | PrivacyError::ContextNotApproved { component, .. }
            | PrivacyError::ApprovalExceedsDiscovery { component, .. } => Some(component),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for PrivacyError {
    fn from(err: config::ConfigError) -> Self {
        PrivacyError::Configuration(err.to_string())
    }
}

impl From<sled::Error> for PrivacyError {
    fn from(err: sled::Error) -> Self {
        PrivacyError::Storage(StorageError::from(err))
    }
}
