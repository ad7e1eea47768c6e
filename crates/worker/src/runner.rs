//! Worker pool that polls the job queue and routes each job by kind.
//!
//! Each slot claims one job at a time. A successful handler acknowledges
//! the job; an error marks it failed with the error text. Jobs are never
//! retried automatically.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use xraygen_db::models::job::{Job, JobKind};
use xraygen_db::{JobQueue, StoreError};

use crate::archive::ArtifactArchiver;
use crate::cascade::CascadeDeleter;
use crate::dispatcher::JobDispatcher;
use crate::error::JobError;

/// Default queue polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    dispatcher: JobDispatcher,
    archiver: ArtifactArchiver,
    deleter: CascadeDeleter,
    name: String,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        dispatcher: JobDispatcher,
        archiver: ArtifactArchiver,
        deleter: CascadeDeleter,
        name: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            archiver,
            deleter,
            name: name.into(),
            concurrency: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn slot_name(&self, slot: usize) -> String {
        format!("{}-{slot}", self.name)
    }

    /// Make jobs claimed by a previous run of this pool visible again.
    pub async fn recover(&self) -> Result<u64, StoreError> {
        let mut requeued = 0;
        for slot in 0..self.concurrency {
            requeued += self.queue.requeue_claimed_by(&self.slot_name(slot)).await?;
        }
        if requeued > 0 {
            tracing::warn!(worker = %self.name, requeued, "Requeued unfinished jobs from previous run");
        }
        Ok(requeued)
    }

    /// Spawn the slots and wait until `cancel` fires and every in-flight
    /// job has finished.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let tracker = TaskTracker::new();
        tracing::info!(
            worker = %self.name,
            concurrency = self.concurrency,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Worker pool started",
        );

        for slot in 0..self.concurrency {
            let pool = Arc::clone(&self);
            let cancel = cancel.clone();
            tracker.spawn(async move { pool.run_slot(slot, cancel).await });
        }
        tracker.close();
        tracker.wait().await;
        tracing::info!(worker = %self.name, "Worker pool stopped");
    }

    async fn run_slot(&self, slot: usize, cancel: CancellationToken) {
        let worker = self.slot_name(slot);
        let mut ticker = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // Drain the queue, but stop taking new jobs once cancelled.
                    while !cancel.is_cancelled() {
                        match self.queue.claim_next(&worker).await {
                            Ok(Some(job)) => {
                                if let Err(e) = self.execute(&job).await {
                                    tracing::error!(%worker, job_id = %job.id, error = %e, "Failed to record job result");
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!(%worker, error = %e, "Queue poll failed");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Claim and execute jobs until the queue has nothing for `worker`.
    /// Returns the number of jobs executed.
    pub async fn run_pending(&self, worker: &str) -> Result<usize, StoreError> {
        let mut executed = 0;
        while let Some(job) = self.queue.claim_next(worker).await? {
            self.execute(&job).await?;
            executed += 1;
        }
        Ok(executed)
    }

    /// Run one claimed job and record the result on the queue.
    pub async fn execute(&self, job: &Job) -> Result<(), StoreError> {
        tracing::debug!(job_id = %job.id, kind = %job.kind, session_id = %job.session_id, attempt = job.attempts, "Job started");
        match self.route(job).await {
            Ok(()) => self.queue.acknowledge(job.id).await,
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    kind = %job.kind,
                    session_id = %job.session_id,
                    error = %e,
                    "Job failed",
                );
                self.queue.fail(job.id, &e.to_string()).await
            }
        }
    }

    async fn route(&self, job: &Job) -> Result<(), JobError> {
        match job.kind {
            JobKind::Render => {
                let outcome = self.dispatcher.handle_render(job).await?;
                tracing::debug!(job_id = %job.id, ?outcome, "Render job finished");
            }
            JobKind::Archive => {
                self.archiver.handle_archive(job).await?;
            }
            JobKind::Delete => {
                let outcome = self.deleter.handle_delete(job).await?;
                tracing::debug!(job_id = %job.id, ?outcome, "Delete job finished");
            }
        }
        Ok(())
    }
}
