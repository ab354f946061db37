//! Composition root: wires stores, queue, manager, processor and notifier from
//! configuration and the host's collaborators.

use crate::config::DataPrivacyConfig;
use crate::context::ContextDirectory;
use crate::error::{PrivacyError, StorageError};
use crate::privacy::archive::{generate_signing_secret, ArchiveStore, DownloadLinkSigner, FileArchiveStore};
use crate::privacy::manager::{ManagerObserver, PrivacyManager};
use crate::privacy::provider::DataProvider;
use crate::privacy::registry::ProviderRegistry;
use crate::queue::{JobQueue, QueueRunner};
use crate::request::jobs::DataRequestJobs;
use crate::request::notifier::{MessageSink, Notifier, TracingSink};
use crate::request::processor::RequestProcessor;
use crate::request::service::DataRequestService;
use crate::request::store::RequestStore;
use crate::users::{AccountDeactivator, Authority, UserDirectory};
use chrono::Duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Durable state shared by the pipeline and the operator CLI
#[derive(Clone)]
pub struct Stores {
    pub db: sled::Db,
    pub requests: Arc<RequestStore>,
    pub queue: Arc<JobQueue>,
    pub archives: Arc<dyn ArchiveStore>,
}

fn resolve(workspace_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace_root.join(path)
    }
}

impl Stores {
    pub fn open(config: &DataPrivacyConfig, workspace_root: &Path) -> Result<Self, PrivacyError> {
        let store_path = resolve(workspace_root, &config.storage.store_path);
        std::fs::create_dir_all(&store_path).map_err(StorageError::IoError)?;
        let db = sled::open(&store_path).map_err(|e| {
            PrivacyError::Configuration(format!(
                "Failed to open store at {}: {}",
                store_path.display(),
                e
            ))
        })?;
        let archive_path = resolve(workspace_root, &config.storage.archive_path);
        Ok(Self {
            requests: RequestStore::shared(db.clone())?,
            queue: Arc::new(JobQueue::new(db.clone(), config.queue.clone())?),
            archives: Arc::new(FileArchiveStore::new(archive_path)?),
            db,
        })
    }
}

/// A fully wired data request pipeline
pub struct Pipeline {
    config: DataPrivacyConfig,
    stores: Stores,
    manager: Arc<PrivacyManager>,
    service: Arc<DataRequestService>,
    processor: Arc<RequestProcessor>,
    runner: Arc<QueueRunner>,
    signer: Arc<DownloadLinkSigner>,
}

impl Pipeline {
    pub fn builder(config: DataPrivacyConfig, workspace_root: impl Into<PathBuf>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            workspace_root: workspace_root.into(),
            registry: ProviderRegistry::new(),
            contexts: None,
            users: None,
            authority: None,
            deactivator: None,
            sink: None,
            observer: None,
        }
    }

    pub fn config(&self) -> &DataPrivacyConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn service(&self) -> &Arc<DataRequestService> {
        &self.service
    }

    pub fn processor(&self) -> &Arc<RequestProcessor> {
        &self.processor
    }

    pub fn manager(&self) -> &Arc<PrivacyManager> {
        &self.manager
    }

    pub fn runner(&self) -> &Arc<QueueRunner> {
        &self.runner
    }

    pub fn signer(&self) -> &Arc<DownloadLinkSigner> {
        &self.signer
    }
}

pub struct PipelineBuilder {
    config: DataPrivacyConfig,
    workspace_root: PathBuf,
    registry: ProviderRegistry,
    contexts: Option<Arc<dyn ContextDirectory>>,
    users: Option<Arc<dyn UserDirectory>>,
    authority: Option<Arc<dyn Authority>>,
    deactivator: Option<Arc<dyn AccountDeactivator>>,
    sink: Option<Arc<dyn MessageSink>>,
    observer: Option<Arc<dyn ManagerObserver>>,
}

impl PipelineBuilder {
    pub fn register(mut self, provider: Arc<dyn DataProvider>) -> Result<Self, PrivacyError> {
        self.registry.register(provider)?;
        Ok(self)
    }

    pub fn contexts(mut self, contexts: Arc<dyn ContextDirectory>) -> Self {
        self.contexts = Some(contexts);
        self
    }

    pub fn users(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn authority(mut self, authority: Arc<dyn Authority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn deactivator(mut self, deactivator: Arc<dyn AccountDeactivator>) -> Self {
        self.deactivator = Some(deactivator);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ManagerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<Pipeline, PrivacyError> {
        if let Err(errors) = self.config.validate() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PrivacyError::Configuration(joined));
        }

        let contexts = self
            .contexts
            .ok_or_else(|| missing("context directory"))?;
        let users = self.users.ok_or_else(|| missing("user directory"))?;
        let authority = self.authority.ok_or_else(|| missing("authority"))?;
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(TracingSink) as Arc<dyn MessageSink>);

        let mut registry = self.registry;
        for component in &self.config.providers.disabled {
            if registry.get(component).is_none() {
                warn!(component = %component, "Disabled component is not registered");
            }
            registry.disable(component);
        }

        let stores = Stores::open(&self.config, &self.workspace_root)?;

        let mut manager = PrivacyManager::new(Arc::new(registry), Arc::clone(&contexts));
        if let Some(observer) = self.observer {
            manager = manager.with_observer(observer);
        }
        let manager = Arc::new(manager);

        let secret = match &self.config.export.signing_secret {
            Some(secret) => secret.clone(),
            None => {
                warn!("No export.signing_secret configured, download links will not survive a restart");
                generate_signing_secret()
            }
        };
        let signer = Arc::new(DownloadLinkSigner::new(
            secret,
            &self.config.export.download_base_url,
            Duration::seconds(self.config.export.link_ttl_secs as i64),
        )?);

        let notifier = Arc::new(Notifier::new(
            sink,
            Arc::clone(&users),
            Arc::clone(&authority),
            self.config.notifications.clone(),
        ));

        let service = Arc::new(DataRequestService::new(
            Arc::clone(&stores.requests),
            Arc::clone(&stores.queue),
            Arc::clone(&manager),
            Arc::clone(&users),
            Arc::clone(&authority),
            Arc::clone(&notifier),
        ));

        let mut processor = RequestProcessor::new(
            Arc::clone(&stores.requests),
            Arc::clone(&manager),
            Arc::clone(&users),
            Arc::clone(&stores.archives),
            Arc::clone(&signer),
            Arc::clone(&notifier),
        );
        match (self.config.processing.deactivate_subject_on_delete, self.deactivator) {
            (true, Some(deactivator)) => processor = processor.with_deactivator(deactivator),
            (true, None) => warn!("Subject deactivation is enabled but no deactivator was supplied"),
            (false, _) => {}
        }
        let processor = Arc::new(processor);

        let runner = Arc::new(QueueRunner::new(
            Arc::clone(&stores.queue),
            Arc::new(DataRequestJobs::new(
                Arc::clone(&service),
                Arc::clone(&processor),
            )),
        ));

        info!(
            providers = manager.registry().len(),
            store = %self.config.storage.store_path.display(),
            "Data request pipeline ready"
        );

        Ok(Pipeline {
            config: self.config,
            stores,
            manager,
            service,
            processor,
            runner,
            signer,
        })
    }
}

fn missing(what: &str) -> PrivacyError {
    PrivacyError::Configuration(format!("pipeline needs a {}", what))
}
