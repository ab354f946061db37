//! Provider metadata: what personal data a component stores and why.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One declared place where a component keeps personal data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetadataItem {
    DatabaseTable {
        name: String,
        /// Field name to purpose string
        fields: BTreeMap<String, String>,
        summary: String,
    },
    /// Data handed to another subsystem that reports it itself
    Subsystem { name: String, summary: String },
    /// Data sent to a system outside the platform
    ExternalLocation {
        name: String,
        fields: BTreeMap<String, String>,
        summary: String,
    },
    UserPreference { name: String, summary: String },
}

impl MetadataItem {
    pub fn name(&self) -> &str {
        match self {
            MetadataItem::DatabaseTable { name, .. }
            | MetadataItem::Subsystem { name, .. }
            | MetadataItem::ExternalLocation { name, .. }
            | MetadataItem::UserPreference { name, .. } => name,
        }
    }
}

/// Metadata declared by a single component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataCollection {
    component: String,
    items: Vec<MetadataItem>,
}

fn to_fields<'a, I>(fields: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl MetadataCollection {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            items: Vec::new(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn add_database_table<'a, I>(&mut self, name: &str, fields: I, summary: &str) -> &mut Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.items.push(MetadataItem::DatabaseTable {
            name: name.to_string(),
            fields: to_fields(fields),
            summary: summary.to_string(),
        });
        self
    }

    pub fn link_subsystem(&mut self, name: &str, summary: &str) -> &mut Self {
        self.items.push(MetadataItem::Subsystem {
            name: name.to_string(),
            summary: summary.to_string(),
        });
        self
    }

    pub fn add_external_location<'a, I>(
        &mut self,
        name: &str,
        fields: I,
        summary: &str,
    ) -> &mut Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.items.push(MetadataItem::ExternalLocation {
            name: name.to_string(),
            fields: to_fields(fields),
            summary: summary.to_string(),
        });
        self
    }

    pub fn add_user_preference(&mut self, name: &str, summary: &str) -> &mut Self {
        self.items.push(MetadataItem::UserPreference {
            name: name.to_string(),
            summary: summary.to_string(),
        });
        self
    }

    pub fn items(&self) -> &[MetadataItem] {
        &self.items
    }

    /// A component that stores nothing declares an empty collection.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Capability interfaces a provider implements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub metadata: bool,
    pub context_discovery: bool,
    pub export: bool,
    pub delete: bool,
    pub user_list: bool,
}

impl Capabilities {
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.metadata {
            names.push("metadata");
        }
        if self.context_discovery {
            names.push("context_discovery");
        }
        if self.export {
            names.push("export");
        }
        if self.delete {
            names.push("delete");
        }
        if self.user_list {
            names.push("user_list");
        }
        names
    }

    /// Metadata only: the component declares data but handles no requests.
    pub fn is_metadata_only(&self) -> bool {
        !(self.context_discovery || self.export || self.delete || self.user_list)
    }
}

/// What the registry knows about a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub component: String,
    pub capabilities: Capabilities,
    pub enabled: bool,
    pub metadata: MetadataCollection,
}
