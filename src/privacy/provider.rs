//! Provider capability traits
//!
//! Every data-holding component implements [`DataProvider`] and opts into request
//! handling by returning the capability objects it supports. The registry and the
//! manager only ever call a capability through these accessors, so a component that
//! stores nothing personal simply returns `None` everywhere.

use crate::context::Context;
use crate::privacy::contextlist::{ApprovedContextList, ContextList};
use crate::privacy::metadata::{Capabilities, MetadataCollection};
use crate::privacy::userlist::{ApprovedUserList, UserList};
use crate::privacy::writer::ComponentWriter;
use crate::types::UserId;
use async_trait::async_trait;

/// Base trait for every component registered with the pipeline
pub trait DataProvider: Send + Sync {
    /// Unique component name, e.g. `mod_forum`
    fn component(&self) -> &str;

    /// Declare what personal data the component stores.
    fn describe(&self, collection: &mut MetadataCollection);

    fn context_discovery(&self) -> Option<&dyn ContextDiscovery> {
        None
    }

    fn exporter(&self) -> Option<&dyn UserDataExporter> {
        None
    }

    fn eraser(&self) -> Option<&dyn UserDataEraser> {
        None
    }

    fn user_lister(&self) -> Option<&dyn UserListProvider> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            metadata: true,
            context_discovery: self.context_discovery().is_some(),
            export: self.exporter().is_some(),
            delete: self.eraser().is_some(),
            user_list: self.user_lister().is_some(),
        }
    }
}

/// Finds the contexts in which a user has data held by the component
#[async_trait]
pub trait ContextDiscovery: Send + Sync {
    /// An empty list means the component holds nothing for the user.
    async fn get_contexts_for_user(&self, user: UserId) -> anyhow::Result<ContextList>;
}

/// Exports a user's data in approved contexts
#[async_trait]
pub trait UserDataExporter: Send + Sync {
    async fn export_user_data(
        &self,
        contexts: &ApprovedContextList,
        writer: &ComponentWriter<'_>,
    ) -> anyhow::Result<()>;
}

/// Deletes personal data
///
/// Both operations must be idempotent: deleting data that is already gone succeeds.
#[async_trait]
pub trait UserDataEraser: Send + Sync {
    async fn delete_data_for_user(&self, contexts: &ApprovedContextList) -> anyhow::Result<()>;

    async fn delete_data_for_all_users_in_context(&self, context: &Context) -> anyhow::Result<()>;
}

/// Bulk operations over all users in a context
#[async_trait]
pub trait UserListProvider: Send + Sync {
    /// Add every user with data in `userlist.context()` to the list.
    async fn get_users_in_context(&self, userlist: &mut UserList) -> anyhow::Result<()>;

    async fn delete_data_for_users(&self, users: &ApprovedUserList) -> anyhow::Result<()>;
}
