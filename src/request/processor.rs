//! Request processor: runs one approved export or delete request to completion.

use crate::context::ContextDirectory;
use crate::error::PrivacyError;
use crate::privacy::archive::{ArchiveKey, ArchiveStore, DownloadLink, DownloadLinkSigner, StoredArchive};
use crate::privacy::contextlist::ApprovedCollection;
use crate::privacy::manager::PrivacyManager;
use crate::request::model::{RequestStatus, RequestType};
use crate::request::notifier::{Notifier, NotifyReport};
use crate::request::store::RequestStore;
use crate::types::{RequestId, UserId};
use crate::users::{AccountDeactivator, UserDirectory};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of processing one request
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// The request was no longer active; nothing was touched.
    Skipped { status: RequestStatus },
    Exported {
        archive: StoredArchive,
        link: DownloadLink,
        notified: NotifyReport,
    },
    Deleted {
        email_only: bool,
        notified: NotifyReport,
    },
}

pub struct RequestProcessor {
    requests: Arc<RequestStore>,
    manager: Arc<PrivacyManager>,
    users: Arc<dyn UserDirectory>,
    archives: Arc<dyn ArchiveStore>,
    signer: Arc<DownloadLinkSigner>,
    notifier: Arc<Notifier>,
    deactivator: Option<Arc<dyn AccountDeactivator>>,
}

impl RequestProcessor {
    pub fn new(
        requests: Arc<RequestStore>,
        manager: Arc<PrivacyManager>,
        users: Arc<dyn UserDirectory>,
        archives: Arc<dyn ArchiveStore>,
        signer: Arc<DownloadLinkSigner>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            requests,
            manager,
            users,
            archives,
            signer,
            notifier,
            deactivator: None,
        }
    }

    /// Remove the subject's account once a delete request completes.
    pub fn with_deactivator(mut self, deactivator: Arc<dyn AccountDeactivator>) -> Self {
        self.deactivator = Some(deactivator);
        self
    }

    pub async fn process(&self, id: RequestId) -> Result<ProcessOutcome, PrivacyError> {
        let result = self.run(id).await;
        if let Err(err) = &result {
            error!(
                request_id = %id,
                component = err.component().unwrap_or("-"),
                error = %err,
                "Data request processing failed"
            );
        }
        result
    }

    async fn run(&self, id: RequestId) -> Result<ProcessOutcome, PrivacyError> {
        let request = match self.requests.require(id) {
            Ok(request) => request,
            Err(PrivacyError::RequestNotFound(_)) => {
                return Err(PrivacyError::Configuration(format!(
                    "data request {} does not exist",
                    id
                )))
            }
            Err(e) => return Err(e),
        };

        if !request.status.is_active() {
            info!(request_id = %id, status = %request.status, "Request is no longer active, skipping");
            return Ok(ProcessOutcome::Skipped {
                status: request.status,
            });
        }
        if !matches!(request.status, RequestStatus::Approved | RequestStatus::Processing) {
            return Err(PrivacyError::InvalidTransition {
                request: id,
                from: request.status,
                to: RequestStatus::Processing,
            });
        }
        let first_attempt = request.status == RequestStatus::Approved;

        let subject = self.users.get_user(request.subject).ok_or_else(|| {
            PrivacyError::Configuration(format!(
                "subject user {} of request {} does not exist",
                request.subject, id
            ))
        })?;
        let user_context = self
            .manager
            .contexts()
            .user_context(subject.id)
            .ok_or_else(|| {
                PrivacyError::Configuration(format!(
                    "subject user {} has no user context",
                    subject.id
                ))
            })?;

        let approved = self.requests.approved_collection(&request)?;

        if first_attempt {
            self.check_still_discoverable(subject.id, &approved).await?;
            match self.requests.transition(id, RequestStatus::Processing) {
                Ok(_) => {}
                // Lost the race with a cancellation.
                Err(PrivacyError::InvalidTransition { from, .. }) if from.is_terminal() => {
                    info!(request_id = %id, status = %from, "Request left Approved before processing, skipping");
                    return Ok(ProcessOutcome::Skipped { status: from });
                }
                Err(e) => return Err(e),
            }
        } else {
            warn!(request_id = %id, "Resuming request already in processing");
        }

        info!(
            request_id = %id,
            request_type = %request.request_type,
            components = approved.len(),
            "Processing data request"
        );

        let exported = match request.request_type {
            RequestType::Export => {
                let key = ArchiveKey::export(user_context.id, id);
                if self.archives.delete(&key)? {
                    info!(request_id = %id, archive = %key, "Discarded archive from an earlier attempt");
                }
                let archive = self.manager.export_user_data(&approved).await?;
                let stored = self.archives.put(&key, &archive.bytes)?;
                let link = self.signer.sign(&key, Utc::now());
                Some((stored, link))
            }
            RequestType::Delete => {
                self.manager.delete_data_for_user(&approved).await?;
                None
            }
        };

        let request = self.requests.transition(id, RequestStatus::Complete)?;
        info!(request_id = %id, "Data request complete");

        match exported {
            Some((archive, link)) => {
                let notified = self
                    .notifier
                    .notify_result(&request, &subject, Some(&link), false)
                    .await;
                Ok(ProcessOutcome::Exported {
                    archive,
                    link,
                    notified,
                })
            }
            None => {
                let email_only = self.deactivator.is_some();
                let notified = self
                    .notifier
                    .notify_result(&request, &subject, None, email_only)
                    .await;
                if let Some(deactivator) = &self.deactivator {
                    match deactivator.deactivate(&subject).await {
                        Ok(()) => info!(request_id = %id, user_id = %subject.id, "Subject account removed"),
                        Err(e) => error!(request_id = %id, user_id = %subject.id, error = %e, "Failed to remove subject account"),
                    }
                }
                Ok(ProcessOutcome::Deleted {
                    email_only,
                    notified,
                })
            }
        }
    }

    /// Every approved context must still be reported by its component.
    async fn check_still_discoverable(
        &self,
        subject: UserId,
        approved: &ApprovedCollection,
    ) -> Result<(), PrivacyError> {
        let discovered = self.manager.get_contexts_for_user(subject).await?;
        for list in approved.iter() {
            let current = discovered.get(list.component());
            for context in list.iter() {
                if !current.map(|c| c.contains(context)).unwrap_or(false) {
                    return Err(PrivacyError::ApprovalExceedsDiscovery {
                        component: list.component().to_string(),
                        context,
                    });
                }
            }
        }
        Ok(())
    }
}
