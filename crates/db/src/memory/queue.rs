use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use xraygen_core::types::JobId;

use crate::error::StoreError;
use crate::models::job::{Job, NewJob};
use crate::models::status::JobStatus;
use crate::store::JobQueue;

#[derive(Default)]
struct State {
    /// Every job ever enqueued, in submission order.
    jobs: Vec<Job>,
    /// Ids of pending jobs, oldest first.
    pending: VecDeque<JobId>,
}

impl State {
    fn job_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }
}

/// FIFO job queue held in process memory.
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<State>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every job, oldest first.
    pub async fn jobs(&self) -> Vec<Job> {
        self.state.lock().await.jobs.clone()
    }

    /// Put a job back on the queue as if it were delivered again.
    pub async fn redeliver(&self, id: JobId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let job = state
            .job_mut(id)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown job {id}")))?;
        job.status = JobStatus::Pending;
        job.worker = None;
        state.pending.push_back(id);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, input: NewJob) -> Result<Job, StoreError> {
        let job = Job {
            id: input.id,
            kind: input.kind,
            session_id: input.session_id,
            status: JobStatus::Pending,
            worker: None,
            attempts: 0,
            error_message: None,
            submitted_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
        };
        let mut state = self.state.lock().await;
        state.jobs.push(job.clone());
        state.pending.push_back(job.id);
        Ok(job)
    }

    async fn claim_next(&self, worker: &str) -> Result<Option<Job>, StoreError> {
        let mut state = self.state.lock().await;
        while let Some(id) = state.pending.pop_front() {
            let Some(job) = state.job_mut(id) else {
                continue;
            };
            if job.status != JobStatus::Pending {
                continue;
            }
            job.status = JobStatus::Claimed;
            job.worker = Some(worker.to_string());
            job.claimed_at = Some(Utc::now());
            job.attempts += 1;
            return Ok(Some(job.clone()));
        }
        Ok(None)
    }

    async fn acknowledge(&self, id: JobId) -> Result<(), StoreError> {
        if let Some(job) = self.state.lock().await.job_mut(id) {
            job.status = JobStatus::Completed;
            job.worker = None;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str) -> Result<(), StoreError> {
        if let Some(job) = self.state.lock().await.job_mut(id) {
            job.status = JobStatus::Failed;
            job.worker = None;
            job.error_message = Some(error.to_string());
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn find_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.state.lock().await.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn requeue_claimed_by(&self, worker: &str) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let mut requeued = Vec::new();
        for job in state.jobs.iter_mut() {
            if job.status == JobStatus::Claimed && job.worker.as_deref() == Some(worker) {
                job.status = JobStatus::Pending;
                job.worker = None;
                job.claimed_at = None;
                requeued.push(job.id);
            }
        }
        let count = requeued.len() as u64;
        state.pending.extend(requeued);
        Ok(count)
    }
}
