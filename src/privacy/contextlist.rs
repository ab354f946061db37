//! Context lists: which contexts hold a subject's data, per component.

use crate::error::PrivacyError;
use crate::types::{ContextId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Contexts a component reports holding data in. Deduplicated and sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextList {
    component: String,
    contexts: BTreeSet<ContextId>,
}

impl ContextList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I: IntoIterator<Item = ContextId>>(ids: I) -> Self {
        Self {
            component: String::new(),
            contexts: ids.into_iter().collect(),
        }
    }

    /// Add a context; returns false when it was already listed.
    pub fn add(&mut self, id: ContextId) -> bool {
        self.contexts.insert(id)
    }

    pub fn extend<I: IntoIterator<Item = ContextId>>(&mut self, ids: I) {
        self.contexts.extend(ids);
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts.contains(&id)
    }

    pub fn context_ids(&self) -> Vec<ContextId> {
        self.contexts.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.contexts.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn set_component(&mut self, component: impl Into<String>) {
        self.component = component.into();
    }
}

/// The contexts an administrator authorized for one component of one request.
///
/// Immutable once built; only these contexts may be touched by the component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedContextList {
    user: UserId,
    component: String,
    contexts: Vec<ContextId>,
}

impl ApprovedContextList {
    pub fn new<I: IntoIterator<Item = ContextId>>(
        user: UserId,
        component: impl Into<String>,
        ids: I,
    ) -> Self {
        let contexts: BTreeSet<ContextId> = ids.into_iter().collect();
        Self {
            user,
            component: component.into(),
            contexts: contexts.into_iter().collect(),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn context_ids(&self) -> &[ContextId] {
        &self.contexts
    }

    pub fn contains(&self, id: ContextId) -> bool {
        self.contexts.binary_search(&id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = ContextId> + '_ {
        self.contexts.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Lists that know which component they belong to
pub trait ComponentScoped {
    fn component(&self) -> &str;
}

impl ComponentScoped for ContextList {
    fn component(&self) -> &str {
        &self.component
    }
}

impl ComponentScoped for ApprovedContextList {
    fn component(&self) -> &str {
        &self.component
    }
}

/// One list per component for a single subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextListCollection<L> {
    user: UserId,
    lists: BTreeMap<String, L>,
}

/// Collection of approved lists, the processor's input
pub type ApprovedCollection = ContextListCollection<ApprovedContextList>;

impl<L: ComponentScoped> ContextListCollection<L> {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            lists: BTreeMap::new(),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    /// Add the list for a component. A second list for the same component is rejected.
    pub fn add(&mut self, list: L) -> Result<(), PrivacyError> {
        let component = list.component().to_string();
        if component.is_empty() {
            return Err(PrivacyError::Configuration(
                "context list has no component".to_string(),
            ));
        }
        if self.lists.contains_key(&component) {
            return Err(PrivacyError::DuplicateComponent(component));
        }
        self.lists.insert(component, list);
        Ok(())
    }

    pub fn get(&self, component: &str) -> Option<&L> {
        self.lists.get(component)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.lists.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &L> {
        self.lists.values()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

impl ContextListCollection<ContextList> {
    /// Union of every component's contexts.
    pub fn all_contexts(&self) -> ContextList {
        let mut all = ContextList::new();
        for list in self.lists.values() {
            all.extend(list.iter());
        }
        all
    }

    /// Approve every discovered context as-is.
    pub fn approve_all(&self) -> ApprovedCollection {
        let mut approved = ContextListCollection::new(self.user);
        for list in self.lists.values() {
            // Components are unique in self, so add cannot collide.
            let _ = approved.add(ApprovedContextList::new(
                self.user,
                list.component(),
                list.iter(),
            ));
        }
        approved
    }
}
