//! Data request model and lifecycle rules.

use crate::types::{ContextId, RequestId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Export,
    Delete,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Export => "export",
            RequestType::Delete => "delete",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "export" => Ok(RequestType::Export),
            "delete" => Ok(RequestType::Delete),
            other => Err(format!("unknown request type: {}", other)),
        }
    }
}

/// Request lifecycle
///
/// ```text
/// Pending -> Preprocessing -> AwaitingApproval -> Approved -> Processing -> Complete
///                                              \-> Rejected
/// (any state before Processing) -> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Preprocessing,
    AwaitingApproval,
    Approved,
    Processing,
    Complete,
    Cancelled,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Preprocessing => "preprocessing",
            RequestStatus::AwaitingApproval => "awaiting_approval",
            RequestStatus::Approved => "approved",
            RequestStatus::Processing => "processing",
            RequestStatus::Complete => "complete",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Complete | RequestStatus::Cancelled | RequestStatus::Rejected
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Cancellation is only honored before processing starts.
    pub fn can_cancel(self) -> bool {
        matches!(
            self,
            RequestStatus::Pending
                | RequestStatus::Preprocessing
                | RequestStatus::AwaitingApproval
                | RequestStatus::Approved
        )
    }

    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        match (self, next) {
            (_, Cancelled) => self.can_cancel(),
            (Pending, Preprocessing)
            | (Preprocessing, AwaitingApproval)
            | (AwaitingApproval, Approved)
            | (AwaitingApproval, Rejected)
            | (Approved, Processing)
            | (Processing, Processing)
            | (Processing, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub id: RequestId,
    pub subject: UserId,
    pub request_type: RequestType,
    pub status: RequestStatus,
    pub requested_by: UserId,
    pub dpo: Option<UserId>,
    #[serde(default)]
    pub comments: String,
    #[serde(default)]
    pub dpo_comment: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl DataRequest {
    pub fn filed_on_behalf(&self) -> bool {
        self.requested_by != self.subject
    }
}

/// Fields supplied when filing a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDataRequest {
    pub subject: UserId,
    pub request_type: RequestType,
    pub requested_by: UserId,
    pub dpo: Option<UserId>,
    pub comments: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    Pending,
    Approved,
    Rejected,
}

/// A context discovered for one component of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request: RequestId,
    pub component: String,
    pub context: ContextId,
    pub status: ContextStatus,
}
