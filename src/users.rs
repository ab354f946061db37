//! User directory and authority ports
//!
//! The platform owns user records and the permission model. The pipeline asks three
//! questions of it: who is this user, who may act for whom, and who are the site's
//! Data Protection Officers. Account removal after an erasure is also delegated.

use crate::types::UserId;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A platform user as seen by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub username: String,
    pub fullname: String,
    pub email: String,
    #[serde(default)]
    pub deleted: bool,
}

impl UserRecord {
    pub fn new(
        id: UserId,
        username: impl Into<String>,
        fullname: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id,
            username: username.into(),
            fullname: fullname.into(),
            email: email.into(),
            deleted: false,
        }
    }
}

pub trait UserDirectory: Send + Sync {
    fn get_user(&self, id: UserId) -> Option<UserRecord>;
}

/// Permission questions answered by the platform
pub trait Authority: Send + Sync {
    fn is_site_dpo(&self, user: UserId) -> bool;

    /// Whether `requester` may file data requests on behalf of `subject`
    /// (for example a parent acting for a child).
    fn can_request_for(&self, requester: UserId, subject: UserId) -> bool;

    fn can_manage_requests(&self, user: UserId) -> bool {
        self.is_site_dpo(user)
    }

    fn site_dpos(&self) -> Vec<UserId>;
}

/// Removes or deactivates the subject's account after an erasure completes
#[async_trait]
pub trait AccountDeactivator: Send + Sync {
    async fn deactivate(&self, user: &UserRecord) -> anyhow::Result<()>;
}

/// In-memory user directory with DPO and delegation grants
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<BTreeMap<UserId, UserRecord>>,
    dpos: RwLock<BTreeSet<UserId>>,
    delegations: RwLock<BTreeSet<(UserId, UserId)>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserRecord) {
        self.users.write().insert(user.id, user);
    }

    pub fn grant_dpo(&self, user: UserId) {
        self.dpos.write().insert(user);
    }

    /// Allow `requester` to act for `subject`.
    pub fn delegate(&self, requester: UserId, subject: UserId) {
        self.delegations.write().insert((requester, subject));
    }

    pub fn revoke_delegation(&self, requester: UserId, subject: UserId) {
        self.delegations.write().remove(&(requester, subject));
    }

    pub fn is_deleted(&self, id: UserId) -> bool {
        self.users.read().get(&id).map(|u| u.deleted).unwrap_or(false)
    }
}

impl UserDirectory for MemoryDirectory {
    fn get_user(&self, id: UserId) -> Option<UserRecord> {
        self.users.read().get(&id).cloned()
    }
}

impl Authority for MemoryDirectory {
    fn is_site_dpo(&self, user: UserId) -> bool {
        self.dpos.read().contains(&user)
    }

    fn can_request_for(&self, requester: UserId, subject: UserId) -> bool {
        self.delegations.read().contains(&(requester, subject))
    }

    fn site_dpos(&self) -> Vec<UserId> {
        self.dpos.read().iter().copied().collect()
    }
}

#[async_trait]
impl AccountDeactivator for MemoryDirectory {
    async fn deactivate(&self, user: &UserRecord) -> anyhow::Result<()> {
        let mut users = self.users.write();
        let record = users
            .get_mut(&user.id)
            .ok_or_else(|| anyhow::anyhow!("user {} not found", user.id))?;
        record.deleted = true;
        Ok(())
    }
}
