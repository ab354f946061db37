//! CLI route: single route table and run context. Dispatches to the stores and presentation.

use crate::cli::help::{command_name, is_read_only};
use crate::cli::parse::{
    ArchiveCommands, Commands, ConfigCommands, JobCommands, RequestCommands,
};
use crate::cli::presentation::{
    format_archive_list, format_job_list, format_purge_result, format_queue_stats,
    format_request_detail, format_request_list,
};
use crate::config::{ConfigLoader, DataPrivacyConfig};
use crate::error::PrivacyError;
use crate::pipeline::Stores;
use crate::privacy::archive::DownloadLinkSigner;
use crate::queue::JobState;
use crate::request::model::RequestStatus;
use crate::types::{JobId, RequestId, UserId};
use chrono::{Duration, Utc};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runtime context for CLI execution: workspace, effective configuration and,
/// once a command needs them, the durable stores.
pub struct RunContext {
    workspace_root: PathBuf,
    config: DataPrivacyConfig,
    config_path: Option<PathBuf>,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, PrivacyError> {
        let config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        Ok(Self {
            workspace_root,
            config,
            config_path,
        })
    }

    pub fn config(&self) -> &DataPrivacyConfig {
        &self.config
    }

    fn stores(&self) -> Result<Stores, PrivacyError> {
        Stores::open(&self.config, &self.workspace_root)
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, PrivacyError> {
        let started = Instant::now();
        let name = command_name(command);
        debug!(command = %name, read_only = is_read_only(command), "Executing command");
        let result = match command {
            Commands::Requests { command } => self.handle_requests(command),
            Commands::Jobs { command } => self.handle_jobs(command),
            Commands::Archives { command } => self.handle_archives(command),
            Commands::Config { command } => self.handle_config(command),
        };
        match &result {
            Ok(_) => info!(
                command = %name,
                duration_ms = started.elapsed().as_millis() as u64,
                "Command finished"
            ),
            Err(e) => warn!(command = %name, error = %e, "Command failed"),
        }
        result
    }

    fn handle_requests(&self, command: &RequestCommands) -> Result<String, PrivacyError> {
        let stores = self.stores()?;
        match command {
            RequestCommands::List { user, all, format } => {
                let mut requests = match user {
                    Some(user) => stores.requests.list_for_user(UserId(*user))?,
                    None => stores.requests.list_all()?,
                };
                if !*all {
                    requests.retain(|r| r.status.is_active());
                }
                format_request_list(&requests, format)
            }
            RequestCommands::Show { id, format } => {
                let request = stores.requests.require(RequestId(*id))?;
                let contexts = stores.requests.contexts_for(request.id)?;
                format_request_detail(&request, &contexts, format)
            }
            RequestCommands::Cancel { id } => {
                let id = RequestId(*id);
                let request = stores.requests.require(id)?;
                if !request.status.can_cancel() {
                    return Err(PrivacyError::InvalidTransition {
                        request: id,
                        from: request.status,
                        to: RequestStatus::Cancelled,
                    });
                }
                stores.requests.transition(id, RequestStatus::Cancelled)?;
                stores.requests.flush()?;
                info!(request_id = %id, "Request cancelled by operator");
                Ok(format!("Request {} cancelled (was {})", id, request.status))
            }
        }
    }

    fn handle_jobs(&self, command: &JobCommands) -> Result<String, PrivacyError> {
        let stores = self.stores()?;
        match command {
            JobCommands::List { failed, format } => {
                let mut jobs = stores.queue.list()?;
                if *failed {
                    jobs.retain(|j| matches!(j.state, JobState::Failed { .. }));
                }
                format_job_list(&jobs, format)
            }
            JobCommands::Stats { format } => format_queue_stats(&stores.queue.stats()?, format),
            JobCommands::Requeue { id } => {
                let id = JobId(*id);
                match stores.queue.requeue(id)? {
                    Some(job) => {
                        stores.queue.flush()?;
                        Ok(format!(
                            "Job {} ({} for request {}) re-queued",
                            job.id, job.kind, job.request
                        ))
                    }
                    None => match stores.queue.get(id)? {
                        Some(job) => Ok(format!(
                            "Job {} is {}, only failed jobs can be re-queued",
                            id,
                            job.state.label()
                        )),
                        None => Ok(format!("Job {} not found", id)),
                    },
                }
            }
        }
    }

    fn handle_archives(&self, command: &ArchiveCommands) -> Result<String, PrivacyError> {
        match command {
            ArchiveCommands::List { format } => {
                let stores = self.stores()?;
                format_archive_list(&stores.archives.list()?, format)
            }
            ArchiveCommands::Purge {
                older_than_days,
                dry_run,
            } => {
                let stores = self.stores()?;
                let days = older_than_days.unwrap_or(self.config.export.retention_days);
                let cutoff = Utc::now() - Duration::days(i64::from(days));
                let keys = if *dry_run {
                    stores
                        .archives
                        .list()?
                        .into_iter()
                        .filter(|a| a.created_at < cutoff)
                        .map(|a| a.key)
                        .collect()
                } else {
                    let purged = stores.archives.purge_older_than(cutoff)?;
                    info!(purged = purged.len(), days, "Purged expired export archives");
                    purged
                };
                Ok(format_purge_result(&keys, cutoff, *dry_run))
            }
            ArchiveCommands::VerifyLink { url } => {
                let secret = self.config.export.signing_secret.clone().ok_or_else(|| {
                    PrivacyError::Configuration(
                        "export.signing_secret is not set, links from a running pipeline cannot be verified"
                            .to_string(),
                    )
                })?;
                let signer = DownloadLinkSigner::new(
                    secret,
                    &self.config.export.download_base_url,
                    Duration::seconds(self.config.export.link_ttl_secs as i64),
                )?;
                match signer.verify(url, Utc::now()) {
                    Some(key) => {
                        let stores = self.stores()?;
                        let stored = stores.archives.exists(&key)?;
                        Ok(format!(
                            "Valid link for {} ({})",
                            key,
                            if stored { "archive present" } else { "archive missing" }
                        ))
                    }
                    None => Ok("Invalid or expired link".to_string()),
                }
            }
        }
    }

    fn handle_config(&self, command: &ConfigCommands) -> Result<String, PrivacyError> {
        match command {
            ConfigCommands::Validate => {
                let source = match &self.config_path {
                    Some(path) => path.display().to_string(),
                    None => format!("workspace {}", self.workspace_root.display()),
                };
                match self.config.validate() {
                    Ok(()) => Ok(format!("Configuration from {} is valid", source)),
                    Err(errors) => {
                        let mut out = format!(
                            "Configuration from {} has {} error(s):",
                            source,
                            errors.len()
                        );
                        for e in &errors {
                            out.push_str(&format!("\n  - {}", e));
                        }
                        Err(PrivacyError::Configuration(out))
                    }
                }
            }
            ConfigCommands::Show => {
                let mut shown = self.config.clone();
                if shown.export.signing_secret.is_some() {
                    shown.export.signing_secret = Some("<redacted>".to_string());
                }
                toml::to_string_pretty(&shown)
                    .map_err(|e| PrivacyError::Configuration(format!("Failed to render config: {}", e)))
            }
        }
    }
}
