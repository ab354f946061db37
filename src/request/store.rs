//! Durable sled-backed request store.

use std::collections::BTreeMap;
use std::sync::Arc;

use sled::{Db, Tree};
use tracing::debug;

use crate::error::{PrivacyError, StorageError};
use crate::privacy::contextlist::{ApprovedCollection, ApprovedContextList};
use crate::request::model::{
    ContextStatus, DataRequest, NewDataRequest, RequestContext, RequestStatus, RequestType,
};
use crate::types::{now_millis, ContextId, RequestId, UserId};

const TREE_REQUESTS: &str = "privacy_requests";
const TREE_CONTEXTS: &str = "privacy_request_contexts";

#[derive(Clone)]
pub struct RequestStore {
    db: Db,
    requests: Tree,
    contexts: Tree,
}

impl RequestStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let requests = db.open_tree(TREE_REQUESTS).map_err(to_storage_db)?;
        let contexts = db.open_tree(TREE_CONTEXTS).map_err(to_storage_db)?;
        Ok(Self {
            db,
            requests,
            contexts,
        })
    }

    pub fn shared(db: Db) -> Result<Arc<Self>, StorageError> {
        Ok(Arc::new(Self::new(db)?))
    }

    pub fn create(&self, new: NewDataRequest) -> Result<DataRequest, StorageError> {
        // sled ids start at zero; request ids start at one.
        let id = RequestId(self.db.generate_id().map_err(to_storage_db)? + 1);
        let now = now_millis();
        let request = DataRequest {
            id,
            subject: new.subject,
            request_type: new.request_type,
            status: RequestStatus::Pending,
            requested_by: new.requested_by,
            dpo: new.dpo,
            comments: new.comments,
            dpo_comment: String::new(),
            created_at_ms: now,
            updated_at_ms: now,
        };
        let value = serde_json::to_vec(&request).map_err(|e| to_storage_data(id, e))?;
        self.requests
            .insert(id.to_key(), value)
            .map_err(to_storage_db)?;
        debug!(request_id = %id, subject = %request.subject, request_type = %request.request_type, "Created data request");
        Ok(request)
    }

    pub fn get(&self, id: RequestId) -> Result<Option<DataRequest>, StorageError> {
        let Some(raw) = self.requests.get(id.to_key()).map_err(to_storage_db)? else {
            return Ok(None);
        };
        Ok(Some(decode(id, &raw)?))
    }

    pub fn require(&self, id: RequestId) -> Result<DataRequest, PrivacyError> {
        self.get(id)?.ok_or(PrivacyError::RequestNotFound(id))
    }

    /// All requests, oldest first
    pub fn list_all(&self) -> Result<Vec<DataRequest>, StorageError> {
        let mut out = Vec::new();
        for result in self.requests.iter() {
            let (key, value) = result.map_err(to_storage_db)?;
            let id = RequestId::from_key(&key).unwrap_or(RequestId(0));
            out.push(decode(id, &value)?);
        }
        Ok(out)
    }

    /// Every request the user is the subject of or filed, for operator lookups
    pub fn list_for_user(&self, user: UserId) -> Result<Vec<DataRequest>, StorageError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|r| r.subject == user || r.requested_by == user)
            .collect())
    }

    pub fn has_ongoing(&self, subject: UserId, request_type: RequestType) -> Result<bool, StorageError> {
        Ok(self
            .list_all()?
            .iter()
            .any(|r| r.subject == subject && r.request_type == request_type && r.status.is_active()))
    }

    pub fn transition(&self, id: RequestId, to: RequestStatus) -> Result<DataRequest, PrivacyError> {
        self.transition_with(id, to, |_| {})
    }

    /// Move a request to `to` and apply `update`, atomically.
    ///
    /// The status check and the write form one compare-and-swap, so of two racing
    /// transitions out of the same state exactly one wins.
    pub fn transition_with<F>(
        &self,
        id: RequestId,
        to: RequestStatus,
        update: F,
    ) -> Result<DataRequest, PrivacyError>
    where
        F: Fn(&mut DataRequest),
    {
        loop {
            let Some(current_raw) = self.requests.get(id.to_key()).map_err(to_storage_db)? else {
                return Err(PrivacyError::RequestNotFound(id));
            };
            let current = decode(id, &current_raw)?;
            if !current.status.can_transition_to(to) {
                return Err(PrivacyError::InvalidTransition {
                    request: id,
                    from: current.status,
                    to,
                });
            }

            let mut next = current.clone();
            next.status = to;
            next.updated_at_ms = now_millis();
            update(&mut next);
            let next_raw = serde_json::to_vec(&next).map_err(|e| to_storage_data(id, e))?;

            match self
                .requests
                .compare_and_swap(id.to_key(), Some(current_raw), Some(next_raw))
                .map_err(to_storage_db)?
            {
                Ok(()) => {
                    debug!(request_id = %id, from = %current.status, to = %to, "Request status changed");
                    return Ok(next);
                }
                Err(_) => continue,
            }
        }
    }

    /// Record discovered contexts for a component; returns how many were new.
    pub fn add_contexts<I>(
        &self,
        request: RequestId,
        component: &str,
        contexts: I,
    ) -> Result<usize, StorageError>
    where
        I: IntoIterator<Item = ContextId>,
    {
        let mut added = 0;
        for context in contexts {
            let record = RequestContext {
                request,
                component: component.to_string(),
                context,
                status: ContextStatus::Pending,
            };
            let value = serde_json::to_vec(&record).map_err(|e| to_storage_data(request, e))?;
            let previous = self
                .contexts
                .insert(context_key(request, component, context), value)
                .map_err(to_storage_db)?;
            if previous.is_none() {
                added += 1;
            }
        }
        Ok(added)
    }

    pub fn contexts_for(&self, request: RequestId) -> Result<Vec<RequestContext>, StorageError> {
        let mut out = Vec::new();
        for result in self.contexts.scan_prefix(request.to_key()) {
            let (_, value) = result.map_err(to_storage_db)?;
            let record: RequestContext =
                serde_json::from_slice(&value).map_err(|e| to_storage_data(request, e))?;
            out.push(record);
        }
        Ok(out)
    }

    pub fn set_all_context_status(
        &self,
        request: RequestId,
        status: ContextStatus,
    ) -> Result<usize, StorageError> {
        let mut updated = 0;
        for mut record in self.contexts_for(request)? {
            record.status = status;
            let value = serde_json::to_vec(&record).map_err(|e| to_storage_data(request, e))?;
            self.contexts
                .insert(context_key(request, &record.component, record.context), value)
                .map_err(to_storage_db)?;
            updated += 1;
        }
        Ok(updated)
    }

    /// Approved request contexts, grouped into one list per component
    pub fn approved_collection(&self, request: &DataRequest) -> Result<ApprovedCollection, PrivacyError> {
        let mut grouped: BTreeMap<String, Vec<ContextId>> = BTreeMap::new();
        for record in self.contexts_for(request.id)? {
            if record.status == ContextStatus::Approved {
                grouped.entry(record.component).or_default().push(record.context);
            }
        }
        let mut collection = ApprovedCollection::new(request.subject);
        for (component, contexts) in grouped {
            collection.add(ApprovedContextList::new(request.subject, component, contexts))?;
        }
        Ok(collection)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_db)?;
        Ok(())
    }
}

fn context_key(request: RequestId, component: &str, context: ContextId) -> Vec<u8> {
    let mut key = Vec::with_capacity(17 + component.len());
    key.extend_from_slice(&request.to_key());
    key.extend_from_slice(component.as_bytes());
    key.push(0);
    key.extend_from_slice(&context.to_key());
    key
}

fn decode(id: RequestId, raw: &[u8]) -> Result<DataRequest, StorageError> {
    serde_json::from_slice(raw).map_err(|e| to_storage_data(id, e))
}

fn to_storage_db(err: sled::Error) -> StorageError {
    StorageError::from(err)
}

fn to_storage_data(id: RequestId, err: serde_json::Error) -> StorageError {
    StorageError::Corrupt {
        key: format!("request:{}", id),
        message: err.to_string(),
    }
}
