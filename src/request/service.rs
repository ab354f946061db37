//! Request service: filing, preprocessing, approval, denial and cancellation.

use crate::context::ContextDirectory;
use crate::error::PrivacyError;
use crate::privacy::contextlist::ApprovedCollection;
use crate::privacy::manager::PrivacyManager;
use crate::queue::{JobKind, JobQueue};
use crate::request::model::{ContextStatus, DataRequest, NewDataRequest, RequestStatus, RequestType};
use crate::request::notifier::Notifier;
use crate::request::store::RequestStore;
use crate::types::{RequestId, UserId};
use crate::users::{Authority, UserDirectory};
use std::sync::Arc;
use tracing::{debug, info};

pub struct DataRequestService {
    requests: Arc<RequestStore>,
    queue: Arc<JobQueue>,
    manager: Arc<PrivacyManager>,
    users: Arc<dyn UserDirectory>,
    authority: Arc<dyn Authority>,
    notifier: Arc<Notifier>,
}

impl DataRequestService {
    pub fn new(
        requests: Arc<RequestStore>,
        queue: Arc<JobQueue>,
        manager: Arc<PrivacyManager>,
        users: Arc<dyn UserDirectory>,
        authority: Arc<dyn Authority>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            requests,
            queue,
            manager,
            users,
            authority,
            notifier,
        }
    }

    /// File a new request and schedule its preprocessing.
    ///
    /// A site DPO filing for someone else becomes the request's DPO. Anyone else
    /// filing on behalf of a user needs the delegation to do so.
    pub fn create_data_request(
        &self,
        actor: UserId,
        subject: UserId,
        request_type: RequestType,
        comments: &str,
    ) -> Result<DataRequest, PrivacyError> {
        if self.users.get_user(subject).is_none() {
            return Err(PrivacyError::InvalidSubject(subject));
        }

        let mut dpo = None;
        if actor != subject {
            if self.authority.is_site_dpo(actor) {
                dpo = Some(actor);
            } else if !self.authority.can_request_for(actor, subject) {
                return Err(PrivacyError::Unauthorized(format!(
                    "user {} may not file data requests for user {}",
                    actor, subject
                )));
            }
        }

        if self.requests.has_ongoing(subject, request_type)? {
            return Err(PrivacyError::OngoingRequest {
                subject,
                kind: request_type.to_string(),
            });
        }

        let request = self.requests.create(NewDataRequest {
            subject,
            request_type,
            requested_by: actor,
            dpo,
            comments: comments.to_string(),
        })?;
        self.queue.enqueue(JobKind::InitiateDataRequest, request.id)?;
        info!(request_id = %request.id, subject = %subject, requested_by = %actor, request_type = %request_type, "Data request filed");
        Ok(request)
    }

    /// Discover the subject's contexts and hand the request to the DPOs.
    pub async fn initiate_request(&self, id: RequestId) -> Result<DataRequest, PrivacyError> {
        let request = self.requests.require(id)?;
        let request = match request.status {
            RequestStatus::Pending => self.requests.transition(id, RequestStatus::Preprocessing)?,
            // A re-delivered job picks up where the crashed one stopped.
            RequestStatus::Preprocessing => request,
            status => {
                debug!(request_id = %id, status = %status, "Request already initiated, skipping");
                return Ok(request);
            }
        };
        let discovered = self.manager.get_contexts_for_user(request.subject).await?;
        let contexts = self.manager.contexts();

        let mut total = 0;
        for list in discovered.iter() {
            let keep: Vec<_> = list
                .iter()
                .filter(|context| {
                    request.request_type != RequestType::Delete
                        || !contexts.is_protected(*context)
                })
                .collect();
            if keep.len() < list.len() {
                info!(
                    request_id = %id,
                    component = %list.component(),
                    skipped = list.len() - keep.len(),
                    "Protected contexts excluded from deletion"
                );
            }
            total += self.requests.add_contexts(id, list.component(), keep)?;
        }

        let request = self.requests.transition(id, RequestStatus::AwaitingApproval)?;
        info!(request_id = %id, contexts = total, "Request awaiting approval");
        self.notifier.notify_dpos(&request).await;
        Ok(request)
    }

    /// Approve every discovered context and schedule processing.
    pub fn approve_data_request(&self, actor: UserId, id: RequestId) -> Result<DataRequest, PrivacyError> {
        self.require_manager(actor)?;
        self.require_awaiting(id, RequestStatus::Approved)?;

        self.requests
            .set_all_context_status(id, ContextStatus::Approved)?;
        let request = self
            .requests
            .transition_with(id, RequestStatus::Approved, |r| r.dpo = Some(actor))?;
        self.queue.enqueue(JobKind::ProcessDataRequest, id)?;
        info!(request_id = %id, dpo = %actor, "Data request approved");
        Ok(request)
    }

    pub fn deny_data_request(&self, actor: UserId, id: RequestId) -> Result<DataRequest, PrivacyError> {
        self.require_manager(actor)?;
        self.require_awaiting(id, RequestStatus::Rejected)?;

        self.requests
            .set_all_context_status(id, ContextStatus::Rejected)?;
        let request = self
            .requests
            .transition_with(id, RequestStatus::Rejected, |r| r.dpo = Some(actor))?;
        info!(request_id = %id, dpo = %actor, "Data request rejected");
        Ok(request)
    }

    /// Cancel a request that has not started processing.
    pub fn cancel_data_request(&self, actor: UserId, id: RequestId) -> Result<DataRequest, PrivacyError> {
        let request = self.requests.require(id)?;
        let allowed = actor == request.subject
            || actor == request.requested_by
            || self.authority.can_manage_requests(actor);
        if !allowed {
            return Err(PrivacyError::Unauthorized(format!(
                "user {} may not cancel request {}",
                actor, id
            )));
        }
        let request = self.requests.transition(id, RequestStatus::Cancelled)?;
        info!(request_id = %id, by = %actor, "Data request cancelled");
        Ok(request)
    }

    /// Requests visible to `viewer`: all of them for a DPO, otherwise those about
    /// the viewer or about a user the viewer may currently act for.
    pub fn get_data_requests(&self, viewer: UserId) -> Result<Vec<DataRequest>, PrivacyError> {
        let all = self.requests.list_all()?;
        if self.authority.can_manage_requests(viewer) {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|r| r.subject == viewer || self.authority.can_request_for(viewer, r.subject))
            .collect())
    }

    pub fn approved_contexts(&self, id: RequestId) -> Result<ApprovedCollection, PrivacyError> {
        let request = self.requests.require(id)?;
        self.requests.approved_collection(&request)
    }

    fn require_manager(&self, actor: UserId) -> Result<(), PrivacyError> {
        if self.authority.can_manage_requests(actor) {
            Ok(())
        } else {
            Err(PrivacyError::Unauthorized(format!(
                "user {} may not manage data requests",
                actor
            )))
        }
    }

    fn require_awaiting(&self, id: RequestId, to: RequestStatus) -> Result<(), PrivacyError> {
        let request = self.requests.require(id)?;
        if request.status != RequestStatus::AwaitingApproval {
            return Err(PrivacyError::InvalidTransition {
                request: id,
                from: request.status,
                to,
            });
        }
        Ok(())
    }
}
