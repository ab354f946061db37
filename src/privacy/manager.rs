//! Privacy manager: fans operations out to every registered provider.
//!
//! Fan-out is sequential and follows registration order, so exports and deletions
//! are reproducible. A provider failure aborts the whole operation; the observer is
//! told which component failed before the error is returned.

use crate::context::{Context, ContextDirectory};
use crate::error::PrivacyError;
use crate::privacy::contextlist::{ApprovedCollection, ContextList, ContextListCollection};
use crate::privacy::metadata::ProviderDescriptor;
use crate::privacy::registry::{Capability, ProviderRegistry};
use crate::privacy::userlist::{ApprovedUserList, UserList};
use crate::privacy::writer::{ExportArchive, ExportWriter};
use crate::types::UserId;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Receives component failures as they happen
pub trait ManagerObserver: Send + Sync {
    fn handle_component_failure(&self, error: &PrivacyError, component: &str, operation: &str);
}

/// Observer that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl ManagerObserver for LoggingObserver {
    fn handle_component_failure(&self, error: &PrivacyError, component: &str, operation: &str) {
        error!(component = %component, operation = %operation, error = %error, "Data provider failed");
    }
}

pub struct PrivacyManager {
    registry: Arc<ProviderRegistry>,
    contexts: Arc<dyn ContextDirectory>,
    observer: Arc<dyn ManagerObserver>,
}

impl PrivacyManager {
    pub fn new(registry: Arc<ProviderRegistry>, contexts: Arc<dyn ContextDirectory>) -> Self {
        Self {
            registry,
            contexts,
            observer: Arc::new(LoggingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ManagerObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn contexts(&self) -> &Arc<dyn ContextDirectory> {
        &self.contexts
    }

    fn fail(&self, component: &str, operation: &'static str, err: anyhow::Error) -> PrivacyError {
        let err = match err.downcast::<PrivacyError>() {
            Ok(e @ PrivacyError::WriterCollision { .. })
            | Ok(e @ PrivacyError::ContextNotApproved { .. }) => e,
            Ok(other) => PrivacyError::Provider {
                component: component.to_string(),
                operation,
                source: anyhow::Error::new(other),
            },
            Err(source) => PrivacyError::Provider {
                component: component.to_string(),
                operation,
                source,
            },
        };
        self.observer
            .handle_component_failure(&err, component, operation);
        err
    }

    /// Ask every discovering provider where the user has data.
    ///
    /// Components that report nothing are left out of the collection.
    pub async fn get_contexts_for_user(
        &self,
        user: UserId,
    ) -> Result<ContextListCollection<ContextList>, PrivacyError> {
        let mut collection = ContextListCollection::new(user);
        for provider in self.registry.with_capability(Capability::ContextDiscovery) {
            let Some(discovery) = provider.context_discovery() else {
                continue;
            };
            let mut list = discovery
                .get_contexts_for_user(user)
                .await
                .map_err(|e| self.fail(provider.component(), "get_contexts_for_user", e))?;
            if list.is_empty() {
                continue;
            }
            list.set_component(provider.component());
            debug!(user_id = %user, component = %provider.component(), contexts = list.len(), "Discovered contexts");
            collection.add(list)?;
        }
        Ok(collection)
    }

    /// Export the approved data of every component into one archive.
    pub async fn export_user_data(
        &self,
        approved: &ApprovedCollection,
    ) -> Result<ExportArchive, PrivacyError> {
        let writer = ExportWriter::new(approved.user(), Arc::clone(&self.contexts));
        let exporters = self.registry.with_capability(Capability::Export);
        self.check_handled(approved, &exporters, "export")?;

        for provider in &exporters {
            let Some(list) = approved.get(provider.component()) else {
                continue;
            };
            if list.is_empty() {
                continue;
            }
            let Some(exporter) = provider.exporter() else {
                continue;
            };
            let component_writer = writer.for_component(list)?;
            exporter
                .export_user_data(list, &component_writer)
                .await
                .map_err(|e| self.fail(provider.component(), "export_user_data", e))?;
            debug!(user_id = %approved.user(), component = %provider.component(), "Exported component data");
        }

        writer.finalise()
    }

    /// Delete the approved data of every component.
    pub async fn delete_data_for_user(&self, approved: &ApprovedCollection) -> Result<(), PrivacyError> {
        let erasers = self.registry.with_capability(Capability::Delete);
        self.check_handled(approved, &erasers, "delete")?;

        for provider in &erasers {
            let Some(list) = approved.get(provider.component()) else {
                continue;
            };
            if list.is_empty() {
                continue;
            }
            let Some(eraser) = provider.eraser() else {
                continue;
            };
            eraser
                .delete_data_for_user(list)
                .await
                .map_err(|e| self.fail(provider.component(), "delete_data_for_user", e))?;
            debug!(user_id = %approved.user(), component = %provider.component(), "Deleted component data");
        }
        Ok(())
    }

    /// Delete every user's data in a context, e.g. when the context is being removed.
    pub async fn delete_data_for_all_users_in_context(&self, context: &Context) -> Result<(), PrivacyError> {
        for provider in self.registry.with_capability(Capability::Delete) {
            let Some(eraser) = provider.eraser() else {
                continue;
            };
            eraser
                .delete_data_for_all_users_in_context(context)
                .await
                .map_err(|e| self.fail(provider.component(), "delete_data_for_all_users_in_context", e))?;
        }
        Ok(())
    }

    /// Collect, per component, the users holding data in `context`.
    pub async fn get_users_in_context(&self, context: &Context) -> Result<Vec<UserList>, PrivacyError> {
        let mut lists = Vec::new();
        for provider in self.registry.with_capability(Capability::UserList) {
            let Some(lister) = provider.user_lister() else {
                continue;
            };
            let mut list = UserList::new(context.id, provider.component());
            lister
                .get_users_in_context(&mut list)
                .await
                .map_err(|e| self.fail(provider.component(), "get_users_in_context", e))?;
            if !list.is_empty() {
                lists.push(list);
            }
        }
        Ok(lists)
    }

    /// Delete data for an approved set of users, in the list's own component.
    pub async fn delete_data_for_users(&self, users: &ApprovedUserList) -> Result<(), PrivacyError> {
        if users.is_empty() {
            return Ok(());
        }
        let provider = self
            .registry
            .with_capability(Capability::UserList)
            .into_iter()
            .find(|p| p.component() == users.component())
            .ok_or_else(|| {
                PrivacyError::Configuration(format!(
                    "component {} cannot delete data for user lists",
                    users.component()
                ))
            })?;
        if let Some(lister) = provider.user_lister() {
            lister
                .delete_data_for_users(users)
                .await
                .map_err(|e| self.fail(provider.component(), "delete_data_for_users", e))?;
        }
        Ok(())
    }

    pub fn metadata(&self) -> Vec<ProviderDescriptor> {
        self.registry.list_providers()
    }

    /// Refuse to run when an approved component is no longer registered or enabled.
    ///
    /// An enabled component without the needed capability has nothing to do and
    /// is skipped.
    fn check_handled(
        &self,
        approved: &ApprovedCollection,
        handlers: &[Arc<dyn crate::privacy::provider::DataProvider>],
        operation: &str,
    ) -> Result<(), PrivacyError> {
        for component in approved.components() {
            if handlers.iter().any(|p| p.component() == component) {
                continue;
            }
            if self.registry.get(component).is_none() || !self.registry.is_enabled(component) {
                return Err(PrivacyError::Configuration(format!(
                    "approved component {} is not an enabled provider, cannot {}",
                    component, operation
                )));
            }
            warn!(component = %component, operation = %operation, "Approved component cannot handle operation, skipping");
        }
        Ok(())
    }
}
