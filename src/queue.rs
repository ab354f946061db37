//! Durable Task Queue
//!
//! At-least-once background jobs for the request pipeline. Jobs are sled records;
//! a worker claims a job by swapping it to `Claimed` with a lease, so no two workers
//! hold the same job. A running worker keeps renewing its lease; a job whose lease
//! expires (its worker crashed or stalled) is handed out again. Only the current
//! lease holder may complete, fail or release a job, and jobs are removed only
//! after their handler succeeds.

use crate::error::{PrivacyError, StorageError};
use crate::types::{now_millis, JobId, RequestId};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const TREE_JOBS: &str = "privacy_jobs";
const TREE_INFLIGHT: &str = "privacy_jobs_inflight";

/// Background job kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Discover contexts for a new request and hand it to the DPO
    InitiateDataRequest,
    /// Export or delete the data of an approved request
    ProcessDataRequest,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::InitiateDataRequest => "initiate_data_request",
            JobKind::ProcessDataRequest => "process_data_request",
        }
    }

    fn tag(self) -> u8 {
        match self {
            JobKind::InitiateDataRequest => 1,
            JobKind::ProcessDataRequest => 2,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Claimed { worker: String, lease_expires_ms: u64 },
    /// Parked for operator re-drive
    Failed { error: String },
}

impl JobState {
    pub fn label(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Claimed { .. } => "claimed",
            JobState::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub request: RequestId,
    pub state: JobState,
    /// Number of times the job has been claimed
    pub attempts: u32,
    /// Earliest time the job may be claimed (retry backoff)
    pub available_at_ms: u64,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl JobRecord {
    fn claimable(&self, now: u64) -> bool {
        match &self.state {
            JobState::Queued => self.available_at_ms <= now,
            JobState::Claimed {
                lease_expires_ms, ..
            } => *lease_expires_ms <= now,
            JobState::Failed { .. } => false,
        }
    }

    /// Whether `worker` is the current lease holder
    fn held_by(&self, worker: &str) -> bool {
        matches!(&self.state, JobState::Claimed { worker: holder, .. } if holder == worker)
    }
}

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of worker tasks
    pub worker_count: usize,
    /// How often idle workers look for new jobs (milliseconds)
    pub poll_interval_ms: u64,
    /// How long a claimed job stays leased before it is re-delivered (milliseconds)
    pub lease_ms: u64,
    /// Maximum claims for jobs failing with retryable errors
    pub max_attempts: u32,
    /// Delay before a retryable failure is offered again (milliseconds)
    pub retry_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            poll_interval_ms: 100,
            lease_ms: 15 * 60 * 1000,
            max_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub claimed: usize,
    pub failed: usize,
    pub lease_lost: usize,
}

/// Durable job queue
pub struct JobQueue {
    db: Db,
    jobs: Tree,
    /// (kind, request) -> job id for every job not yet completed
    inflight: Tree,
    config: QueueConfig,
    notify: Arc<Notify>,
}

impl JobQueue {
    pub fn new(db: Db, config: QueueConfig) -> Result<Self, StorageError> {
        let jobs = db.open_tree(TREE_JOBS)?;
        let inflight = db.open_tree(TREE_INFLIGHT)?;
        Ok(Self {
            db,
            jobs,
            inflight,
            config,
            notify: Arc::new(Notify::new()),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Add a job, unless one for the same (kind, request) is already in flight.
    ///
    /// Returns the id of the job that will run. A parked failed job for the same
    /// work is queued again instead of creating a second one.
    pub fn enqueue(&self, kind: JobKind, request: RequestId) -> Result<JobId, StorageError> {
        let dedupe_key = inflight_key(kind, request);
        let id = JobId(self.db.generate_id()? + 1);

        match self
            .inflight
            .compare_and_swap(&dedupe_key, None as Option<&[u8]>, Some(&id.to_key()[..]))?
        {
            Ok(()) => {}
            Err(existing) => {
                let existing = existing
                    .current
                    .as_deref()
                    .and_then(JobId::from_key)
                    .ok_or_else(|| StorageError::Corrupt {
                        key: format!("inflight:{}:{}", kind, request),
                        message: "dedupe entry without job id".to_string(),
                    })?;
                if let Some(job) = self.get(existing)? {
                    if matches!(job.state, JobState::Failed { .. }) {
                        self.requeue(existing)?;
                    }
                    debug!(job_id = %existing, kind = %kind, request_id = %request, "Job already in flight");
                    return Ok(existing);
                }
                // Dangling index entry; take it over.
                self.inflight.insert(&dedupe_key, &id.to_key()[..])?;
            }
        }

        let now = now_millis();
        let record = JobRecord {
            id,
            kind,
            request,
            state: JobState::Queued,
            attempts: 0,
            available_at_ms: now,
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.jobs.insert(id.to_key(), encode(&record)?)?;
        debug!(job_id = %id, kind = %kind, request_id = %request, "Enqueued job");
        self.notify.notify_one();
        Ok(id)
    }

    pub fn get(&self, id: JobId) -> Result<Option<JobRecord>, StorageError> {
        match self.jobs.get(id.to_key())? {
            Some(raw) => Ok(Some(decode(id, &raw)?)),
            None => Ok(None),
        }
    }

    /// All jobs, oldest first
    pub fn list(&self) -> Result<Vec<JobRecord>, StorageError> {
        let mut out = Vec::new();
        for result in self.jobs.iter() {
            let (key, value) = result?;
            let id = JobId::from_key(&key).unwrap_or(JobId(0));
            out.push(decode(id, &value)?);
        }
        Ok(out)
    }

    /// Lease the oldest claimable job to `worker`.
    pub fn claim(&self, worker: &str) -> Result<Option<JobRecord>, StorageError> {
        let now = now_millis();
        for result in self.jobs.iter() {
            let (key, raw) = result?;
            let id = JobId::from_key(&key).unwrap_or(JobId(0));
            let current = decode(id, &raw)?;
            if !current.claimable(now) {
                continue;
            }
            if let JobState::Claimed { worker: previous, .. } = &current.state {
                warn!(job_id = %id, previous_worker = %previous, "Lease expired, re-delivering job");
            }

            let mut next = current.clone();
            next.state = JobState::Claimed {
                worker: worker.to_string(),
                lease_expires_ms: now + self.config.lease_ms,
            };
            next.attempts += 1;
            next.updated_at_ms = now;

            // Another worker may have claimed it since we read it.
            if self
                .jobs
                .compare_and_swap(&key, Some(raw), Some(encode(&next)?))?
                .is_ok()
            {
                debug!(job_id = %id, worker_id = %worker, attempt = next.attempts, "Claimed job");
                return Ok(Some(next));
            }
        }
        Ok(None)
    }

    /// Remove a finished job, if `worker` still holds its lease.
    ///
    /// Returns false when the job is gone or was re-delivered to another worker;
    /// the current holder then decides its fate.
    pub fn complete(&self, id: JobId, worker: &str) -> Result<bool, StorageError> {
        loop {
            let Some(raw) = self.jobs.get(id.to_key())? else {
                return Ok(false);
            };
            let job = decode(id, &raw)?;
            if !job.held_by(worker) {
                warn!(job_id = %id, worker_id = %worker, state = job.state.label(), "Lease lost, leaving job to its holder");
                return Ok(false);
            }
            if self
                .jobs
                .compare_and_swap(id.to_key(), Some(raw), None as Option<&[u8]>)?
                .is_err()
            {
                continue;
            }
            let dedupe_key = inflight_key(job.kind, job.request);
            // Only drop the index entry if it still points at this job.
            let _ = self.inflight.compare_and_swap(
                &dedupe_key,
                Some(&id.to_key()[..]),
                None as Option<&[u8]>,
            )?;
            return Ok(true);
        }
    }

    /// Park a job held by `worker` for operator re-drive.
    pub fn fail(&self, id: JobId, worker: &str, error: &str) -> Result<Option<JobRecord>, StorageError> {
        self.update(id, |job| {
            if !job.held_by(worker) {
                return false;
            }
            job.state = JobState::Failed {
                error: error.to_string(),
            };
            true
        })
    }

    /// Offer a job held by `worker` again after `delay_ms`.
    pub fn release_for_retry(
        &self,
        id: JobId,
        worker: &str,
        delay_ms: u64,
    ) -> Result<Option<JobRecord>, StorageError> {
        let released = self.update(id, |job| {
            if !job.held_by(worker) {
                return false;
            }
            job.state = JobState::Queued;
            job.available_at_ms = now_millis() + delay_ms;
            true
        })?;
        self.notify.notify_one();
        Ok(released)
    }

    /// Extend the lease `worker` holds on a job.
    ///
    /// Returns None once the lease has passed to another worker.
    pub fn renew(&self, id: JobId, worker: &str) -> Result<Option<JobRecord>, StorageError> {
        let lease_ms = self.config.lease_ms;
        self.update(id, |job| {
            if !job.held_by(worker) {
                return false;
            }
            job.state = JobState::Claimed {
                worker: worker.to_string(),
                lease_expires_ms: now_millis() + lease_ms,
            };
            true
        })
    }

    /// Queue a failed job again with a fresh attempt budget.
    pub fn requeue(&self, id: JobId) -> Result<Option<JobRecord>, StorageError> {
        let requeued = self.update(id, |job| {
            if !matches!(job.state, JobState::Failed { .. }) {
                return false;
            }
            job.state = JobState::Queued;
            job.attempts = 0;
            job.available_at_ms = now_millis();
            true
        })?;
        if requeued.is_some() {
            info!(job_id = %id, "Re-queued failed job");
            self.notify.notify_one();
        }
        Ok(requeued)
    }

    pub fn stats(&self) -> Result<QueueStats, StorageError> {
        let mut stats = QueueStats::default();
        for job in self.list()? {
            match job.state {
                JobState::Queued => stats.queued += 1,
                JobState::Claimed { .. } => stats.claimed += 1,
                JobState::Failed { .. } => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Compare-and-swap update; `apply` returns false to leave the job unchanged.
    fn update<F>(&self, id: JobId, apply: F) -> Result<Option<JobRecord>, StorageError>
    where
        F: Fn(&mut JobRecord) -> bool,
    {
        loop {
            let Some(raw) = self.jobs.get(id.to_key())? else {
                return Ok(None);
            };
            let mut next = decode(id, &raw)?;
            if !apply(&mut next) {
                return Ok(None);
            }
            next.updated_at_ms = now_millis();
            if self
                .jobs
                .compare_and_swap(id.to_key(), Some(raw), Some(encode(&next)?))?
                .is_ok()
            {
                return Ok(Some(next));
            }
        }
    }
}

fn inflight_key(kind: JobKind, request: RequestId) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = kind.tag();
    key[1..].copy_from_slice(&request.to_key());
    key
}

fn encode(job: &JobRecord) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(job).map_err(|e| StorageError::Corrupt {
        key: format!("job:{}", job.id),
        message: e.to_string(),
    })
}

fn decode(id: JobId, raw: &[u8]) -> Result<JobRecord, StorageError> {
    serde_json::from_slice(raw).map_err(|e| StorageError::Corrupt {
        key: format!("job:{}", id),
        message: e.to_string(),
    })
}

/// Executes claimed jobs
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &JobRecord) -> Result<(), PrivacyError>;
}

/// What happened to one claimed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(JobId),
    Retrying(JobId),
    Failed(JobId),
    /// The lease passed to another worker before this one finished
    LeaseLost(JobId),
}

/// Totals from draining the queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub lease_lost: usize,
}

/// Drives jobs from a [`JobQueue`] through a [`JobHandler`]
pub struct QueueRunner {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    workers: RwLock<Vec<tokio::task::JoinHandle<()>>>,
    running: Arc<RwLock<bool>>,
}

impl QueueRunner {
    pub fn new(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            queue,
            handler,
            workers: RwLock::new(Vec::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Claim and run a single job, if one is available.
    pub async fn run_once(&self, worker_id: &str) -> Result<Option<JobOutcome>, StorageError> {
        Self::run_next(&self.queue, self.handler.as_ref(), worker_id).await
    }

    /// Run jobs until none is claimable.
    pub async fn run_until_idle(&self, worker_id: &str) -> Result<RunSummary, StorageError> {
        let mut summary = RunSummary::default();
        while let Some(outcome) = self.run_once(worker_id).await? {
            match outcome {
                JobOutcome::Completed(_) => summary.completed += 1,
                JobOutcome::Retrying(_) => summary.retried += 1,
                JobOutcome::Failed(_) => summary.failed += 1,
                JobOutcome::LeaseLost(_) => summary.lease_lost += 1,
            }
        }
        Ok(summary)
    }

    async fn run_next(
        queue: &JobQueue,
        handler: &dyn JobHandler,
        worker_id: &str,
    ) -> Result<Option<JobOutcome>, StorageError> {
        let Some(job) = queue.claim(worker_id)? else {
            return Ok(None);
        };

        let started = Instant::now();
        let result = Self::handle_with_lease(queue, handler, &job, worker_id).await;
        match result {
            Ok(()) => {
                if !queue.complete(job.id, worker_id)? {
                    return Ok(Some(JobOutcome::LeaseLost(job.id)));
                }
                info!(
                    job_id = %job.id,
                    kind = %job.kind,
                    request_id = %job.request,
                    worker_id = %worker_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                Ok(Some(JobOutcome::Completed(job.id)))
            }
            Err(err) if err.is_retryable() && job.attempts < queue.config.max_attempts => {
                warn!(
                    job_id = %job.id,
                    kind = %job.kind,
                    request_id = %job.request,
                    attempt = job.attempts,
                    error = %err,
                    "Job failed, will retry"
                );
                if queue
                    .release_for_retry(job.id, worker_id, queue.config.retry_delay_ms)?
                    .is_none()
                {
                    return Ok(Some(JobOutcome::LeaseLost(job.id)));
                }
                Ok(Some(JobOutcome::Retrying(job.id)))
            }
            Err(err) => {
                error!(
                    job_id = %job.id,
                    kind = %job.kind,
                    request_id = %job.request,
                    component = err.component().unwrap_or("-"),
                    attempt = job.attempts,
                    error = %err,
                    "Job failed permanently"
                );
                if queue.fail(job.id, worker_id, &err.to_string())?.is_none() {
                    return Ok(Some(JobOutcome::LeaseLost(job.id)));
                }
                Ok(Some(JobOutcome::Failed(job.id)))
            }
        }
    }

    /// Run the handler while renewing the job's lease at a third of its length.
    async fn handle_with_lease(
        queue: &JobQueue,
        handler: &dyn JobHandler,
        job: &JobRecord,
        worker_id: &str,
    ) -> Result<(), PrivacyError> {
        let renew_every = Duration::from_millis((queue.config.lease_ms / 3).max(1));
        let handling = handler.handle(job);
        tokio::pin!(handling);

        loop {
            tokio::select! {
                result = &mut handling => return result,
                _ = sleep(renew_every) => match queue.renew(job.id, worker_id) {
                    Ok(Some(_)) => {}
                    Ok(None) => warn!(job_id = %job.id, worker_id = %worker_id, "Lease taken over by another worker"),
                    Err(e) => warn!(job_id = %job.id, worker_id = %worker_id, error = %e, "Failed to renew job lease"),
                },
            }
        }
    }

    /// Start background workers
    pub fn start(&self) {
        let mut running = self.running.write();
        if *running {
            return;
        }
        *running = true;
        drop(running);

        let mut workers = self.workers.write();
        for i in 0..self.queue.config.worker_count.max(1) {
            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&self.handler);
            let running = Arc::clone(&self.running);
            workers.push(tokio::spawn(async move {
                Self::worker_loop(i, queue, handler, running).await;
            }));
        }
        info!(worker_count = workers.len(), "Started data request workers");
    }

    /// Stop background workers (graceful shutdown)
    pub async fn stop(&self) {
        {
            let mut running = self.running.write();
            if !*running {
                return;
            }
            *running = false;
        }
        self.queue.notify.notify_waiters();

        let workers = std::mem::take(&mut *self.workers.write());
        for handle in futures::future::join_all(workers).await {
            if let Err(e) = handle {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Stopped data request workers");
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Wait until no job is queued or claimed.
    pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<(), PrivacyError> {
        let start = Instant::now();
        loop {
            let stats = self.queue.stats()?;
            if stats.queued == 0 && stats.claimed == 0 {
                return Ok(());
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(PrivacyError::Configuration(
                        "Timeout waiting for job queue to drain".to_string(),
                    ));
                }
            }
            sleep(Duration::from_millis(self.queue.config.poll_interval_ms)).await;
        }
    }

    async fn worker_loop(
        worker_index: usize,
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        running: Arc<RwLock<bool>>,
    ) {
        let worker_id = format!("worker-{}-{}", std::process::id(), worker_index);
        debug!(worker_id = %worker_id, "Worker started");
        let poll = Duration::from_millis(queue.config.poll_interval_ms.max(1));

        while *running.read() {
            match Self::run_next(&queue, handler.as_ref(), &worker_id).await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    tokio::select! {
                        _ = queue.notify.notified() => continue,
                        _ = sleep(poll) => continue,
                    }
                }
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "Job queue storage error");
                    sleep(poll).await;
                }
            }
        }

        debug!(worker_id = %worker_id, "Worker stopped");
    }
}
