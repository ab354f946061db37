//! Provider registry: typed, startup-time aggregate of data providers.

use crate::error::PrivacyError;
use crate::privacy::metadata::{MetadataCollection, ProviderDescriptor};
use crate::privacy::provider::DataProvider;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Capability a fan-out step needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ContextDiscovery,
    Export,
    Delete,
    UserList,
}

/// Provider registry
///
/// Keeps providers in registration order; every fan-out iterates in that order.
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn DataProvider>>,
    disabled: HashSet<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider
    ///
    /// Rejects duplicate component names and request handlers that cannot
    /// discover their own contexts.
    pub fn register(&mut self, provider: Arc<dyn DataProvider>) -> Result<(), PrivacyError> {
        let component = provider.component().to_string();
        if component.trim().is_empty() {
            return Err(PrivacyError::Configuration(
                "provider component name cannot be empty".to_string(),
            ));
        }
        if self.get(&component).is_some() {
            return Err(PrivacyError::DuplicateComponent(component));
        }

        let caps = provider.capabilities();
        if (caps.export || caps.delete) && !caps.context_discovery {
            return Err(PrivacyError::Configuration(format!(
                "provider {} handles requests but cannot discover contexts",
                component
            )));
        }

        debug!(component = %component, capabilities = ?caps.names(), "Registered data provider");
        self.providers.push(provider);
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, provider: Arc<dyn DataProvider>) -> Result<Self, PrivacyError> {
        self.register(provider)?;
        Ok(self)
    }

    pub fn disable(&mut self, component: &str) {
        if self.disabled.insert(component.to_string()) {
            info!(component = %component, "Data provider disabled");
        }
    }

    pub fn enable(&mut self, component: &str) {
        self.disabled.remove(component);
    }

    pub fn is_enabled(&self, component: &str) -> bool {
        !self.disabled.contains(component)
    }

    pub fn get(&self, component: &str) -> Option<&Arc<dyn DataProvider>> {
        self.providers.iter().find(|p| p.component() == component)
    }

    /// Enabled providers, in registration order
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn DataProvider>> {
        self.providers
            .iter()
            .filter(move |p| self.is_enabled(p.component()))
    }

    /// Enabled providers implementing `capability`, in registration order
    pub fn with_capability(&self, capability: Capability) -> Vec<Arc<dyn DataProvider>> {
        self.enabled()
            .filter(|p| {
                let caps = p.capabilities();
                match capability {
                    Capability::ContextDiscovery => caps.context_discovery,
                    Capability::Export => caps.export,
                    Capability::Delete => caps.delete,
                    Capability::UserList => caps.user_list,
                }
            })
            .cloned()
            .collect()
    }

    /// Describe every registered provider, disabled ones included
    pub fn list_providers(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .iter()
            .map(|p| {
                let mut metadata = MetadataCollection::new(p.component());
                p.describe(&mut metadata);
                ProviderDescriptor {
                    component: p.component().to_string(),
                    capabilities: p.capabilities(),
                    enabled: self.is_enabled(p.component()),
                    metadata,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
