//! User lists: which users hold data in one context, for bulk deletion.

use crate::types::{ContextId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Users a component reports holding data for within a single context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserList {
    context: ContextId,
    component: String,
    users: BTreeSet<UserId>,
}

impl UserList {
    pub fn new(context: ContextId, component: impl Into<String>) -> Self {
        Self {
            context,
            component: component.into(),
            users: BTreeSet::new(),
        }
    }

    pub fn add_user(&mut self, user: UserId) -> bool {
        self.users.insert(user)
    }

    pub fn add_users<I: IntoIterator<Item = UserId>>(&mut self, users: I) {
        self.users.extend(users);
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn user_ids(&self) -> Vec<UserId> {
        self.users.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Users an administrator approved for bulk deletion within one context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedUserList {
    context: ContextId,
    component: String,
    users: Vec<UserId>,
}

impl ApprovedUserList {
    pub fn new<I: IntoIterator<Item = UserId>>(
        context: ContextId,
        component: impl Into<String>,
        users: I,
    ) -> Self {
        let users: BTreeSet<UserId> = users.into_iter().collect();
        Self {
            context,
            component: component.into(),
            users: users.into_iter().collect(),
        }
    }

    /// Approve the subset of a discovered list that passes `keep`.
    pub fn from_userlist<F>(list: &UserList, keep: F) -> Self
    where
        F: Fn(UserId) -> bool,
    {
        Self::new(
            list.context,
            list.component.clone(),
            list.users.iter().copied().filter(|u| keep(*u)),
        )
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn user_ids(&self) -> &[UserId] {
        &self.users
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
