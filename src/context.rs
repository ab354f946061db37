//! Context tree
//!
//! Contexts are the platform's scope hierarchy (system > category > course > module,
//! with blocks below courses or modules and a parallel per-user branch). The pipeline
//! only reads them: they are created and destroyed by the surrounding platform and
//! reach this crate through the [`ContextDirectory`] port.

use crate::types::{ContextId, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Level of a context in the scope tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextLevel {
    System,
    User,
    Category,
    Course,
    Module,
    Block,
}

impl ContextLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextLevel::System => "system",
            ContextLevel::User => "user",
            ContextLevel::Category => "category",
            ContextLevel::Course => "course",
            ContextLevel::Module => "module",
            ContextLevel::Block => "block",
        }
    }

    fn label(self) -> &'static str {
        match self {
            ContextLevel::System => "System",
            ContextLevel::User => "User",
            ContextLevel::Category => "Category",
            ContextLevel::Course => "Course",
            ContextLevel::Module => "Module",
            ContextLevel::Block => "Block",
        }
    }
}

/// A node in the scope tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: ContextId,
    pub level: ContextLevel,
    /// Id of the object the context wraps (course id, user id, ...)
    pub instance_id: u64,
    pub parent: Option<ContextId>,
    pub name: String,
    /// Protected contexts are never offered for deletion.
    #[serde(default)]
    pub protected: bool,
}

impl Context {
    pub fn new(
        id: ContextId,
        level: ContextLevel,
        instance_id: u64,
        parent: Option<ContextId>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            level,
            instance_id,
            parent,
            name: name.into(),
            protected: false,
        }
    }

    pub fn system(id: ContextId) -> Self {
        Self::new(id, ContextLevel::System, 0, None, "System")
    }

    pub fn user(id: ContextId, user: UserId, parent: ContextId) -> Self {
        Self::new(
            id,
            ContextLevel::User,
            user.as_u64(),
            Some(parent),
            format!("User {}", user),
        )
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    /// Directory name used for this context inside export archives.
    pub fn path_segment(&self) -> String {
        let name = if self.name.trim().is_empty() {
            self.level.label().to_string()
        } else {
            sanitize_segment(&self.name)
        };
        format!("{} _.{}", name, self.id)
    }
}

fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Read-only access to the platform's contexts
pub trait ContextDirectory: Send + Sync {
    fn get(&self, id: ContextId) -> Option<Context>;

    fn user_context(&self, user: UserId) -> Option<Context>;

    /// Ancestors of `id` from the root down to and including the context itself.
    fn lineage(&self, id: ContextId) -> Vec<Context> {
        let mut chain = Vec::new();
        let mut cursor = self.get(id);
        while let Some(context) = cursor {
            cursor = context.parent.and_then(|parent| {
                if chain.iter().any(|c: &Context| c.id == parent) {
                    None
                } else {
                    self.get(parent)
                }
            });
            chain.push(context);
        }
        chain.reverse();
        chain
    }

    /// A context is protected when it or any of its ancestors is.
    fn is_protected(&self, id: ContextId) -> bool {
        self.lineage(id).iter().any(|c| c.protected)
    }

    /// Relative archive path for a context, e.g. `System _.1/Course 3 _.12`.
    fn archive_path(&self, id: ContextId) -> String {
        let lineage = self.lineage(id);
        if lineage.is_empty() {
            return format!("Unknown _.{}", id);
        }
        lineage
            .iter()
            .map(Context::path_segment)
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// In-memory context tree
///
/// Suitable for embedding hosts that mirror their context table at startup,
/// and for tests.
#[derive(Default)]
pub struct ContextTree {
    contexts: RwLock<BTreeMap<ContextId, Context>>,
}

impl ContextTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, context: Context) {
        self.contexts.write().insert(context.id, context);
    }

    pub fn with(self, context: Context) -> Self {
        self.insert(context);
        self
    }

    pub fn remove(&self, id: ContextId) -> Option<Context> {
        self.contexts.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }
}

impl ContextDirectory for ContextTree {
    fn get(&self, id: ContextId) -> Option<Context> {
        self.contexts.read().get(&id).cloned()
    }

    fn user_context(&self, user: UserId) -> Option<Context> {
        self.contexts
            .read()
            .values()
            .find(|c| c.level == ContextLevel::User && c.instance_id == user.as_u64())
            .cloned()
    }
}
