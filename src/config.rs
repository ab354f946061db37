//! Configuration System
//!
//! Layered configuration: built-in defaults, then the global file
//! (`$XDG_CONFIG_HOME/dataprivacy/config.toml`), then the workspace file
//! (`<workspace>/dataprivacy.toml`), then `DATAPRIVACY__*` environment variables.

use crate::logging::LoggingConfig;
use crate::queue::QueueConfig;
use crate::request::notifier::NotificationSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPrivacyConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub export: ExportConfig,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage paths, relative paths resolve against the workspace root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    #[serde(default = "default_archive_path")]
    pub archive_path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".dataprivacy/store")
}

fn default_archive_path() -> PathBuf {
    PathBuf::from(".dataprivacy/archives")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            archive_path: default_archive_path(),
        }
    }
}

/// Export archive delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Base URL download links are built on
    pub download_base_url: String,
    /// How long a download link stays valid (seconds)
    pub link_ttl_secs: u64,
    /// HMAC key for download links; a random key is generated per process when unset
    pub signing_secret: Option<String>,
    /// Archives older than this are removed by `archives purge` (days)
    pub retention_days: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            download_base_url: "http://localhost/pluginfile.php/".to_string(),
            link_ttl_secs: 7 * 24 * 60 * 60,
            signing_secret: None,
            retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Remove the subject's account once a delete request completes
    pub deactivate_subject_on_delete: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            deactivate_subject_on_delete: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Components excluded from every fan-out
    pub disabled: Vec<String>,
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Storage(String),
    Queue(String),
    Export(String),
    Notifications(String),
    Providers(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ValidationError::Queue(msg) => write!(f, "Queue: {}", msg),
            ValidationError::Export(msg) => write!(f, "Export: {}", msg),
            ValidationError::Notifications(msg) => write!(f, "Notifications: {}", msg),
            ValidationError::Providers(msg) => write!(f, "Providers: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

fn check_url(raw: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("invalid URL {}: {}", raw, e))?;
    if parsed.cannot_be_a_base() {
        return Err(format!("URL {} cannot carry a path", raw));
    }
    Ok(parsed)
}

impl DataPrivacyConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.storage.store_path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "Store path cannot be empty".to_string(),
            ));
        }
        if self.storage.archive_path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "Archive path cannot be empty".to_string(),
            ));
        }

        if self.queue.worker_count == 0 {
            errors.push(ValidationError::Queue(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.queue.max_attempts == 0 {
            errors.push(ValidationError::Queue(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.queue.lease_ms == 0 {
            errors.push(ValidationError::Queue(
                "lease_ms must be greater than zero".to_string(),
            ));
        }
        if self.queue.poll_interval_ms == 0 {
            errors.push(ValidationError::Queue(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }

        if let Err(e) = check_url(&self.export.download_base_url) {
            errors.push(ValidationError::Export(e));
        }
        if self.export.link_ttl_secs == 0 {
            errors.push(ValidationError::Export(
                "link_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(secret) = &self.export.signing_secret {
            if secret.len() < 16 {
                errors.push(ValidationError::Export(
                    "signing_secret must be at least 16 characters".to_string(),
                ));
            }
        }

        if self.notifications.site_name.trim().is_empty() {
            errors.push(ValidationError::Notifications(
                "site_name cannot be empty".to_string(),
            ));
        }
        if let Err(e) = check_url(&self.notifications.requests_url) {
            errors.push(ValidationError::Notifications(e));
        }

        let mut seen = HashSet::new();
        for component in &self.providers.disabled {
            if component.trim().is_empty() {
                errors.push(ValidationError::Providers(
                    "disabled component name cannot be empty".to_string(),
                ));
            } else if !seen.insert(component.as_str()) {
                errors.push(ValidationError::Providers(format!(
                    "component {} listed twice in disabled",
                    component
                )));
            }
        }

        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
