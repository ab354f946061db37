//! Job handler connecting the task queue to the request service and processor.

use crate::error::PrivacyError;
use crate::queue::{JobHandler, JobKind, JobRecord};
use crate::request::processor::{ProcessOutcome, RequestProcessor};
use crate::request::service::DataRequestService;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct DataRequestJobs {
    service: Arc<DataRequestService>,
    processor: Arc<RequestProcessor>,
}

impl DataRequestJobs {
    pub fn new(service: Arc<DataRequestService>, processor: Arc<RequestProcessor>) -> Self {
        Self { service, processor }
    }
}

#[async_trait]
impl JobHandler for DataRequestJobs {
    async fn handle(&self, job: &JobRecord) -> Result<(), PrivacyError> {
        match job.kind {
            JobKind::InitiateDataRequest => {
                self.service.initiate_request(job.request).await?;
            }
            JobKind::ProcessDataRequest => {
                if let ProcessOutcome::Skipped { status } = self.processor.process(job.request).await? {
                    debug!(job_id = %job.id, request_id = %job.request, status = %status, "Nothing to process");
                }
            }
        }
        Ok(())
    }
}
