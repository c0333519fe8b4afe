use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::types::{JobSnapshot, JobStatus, Opportunity};

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Registry-owned state of one analysis run. Only the job's worker writes
/// progress and results; pollers read copies via [`JobRegistry::snapshot`].
#[derive(Debug)]
struct Job {
    status: JobStatus,
    progress: usize,
    total: usize,
    results: Vec<Opportunity>,
    cancel: CancellationToken,
    finished_at: Option<Instant>,
}

impl Job {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            status: self.status,
            progress: self.progress,
            total: self.total,
            results: self.results.clone(),
            cancelled: self.cancel.is_cancelled(),
        }
    }
}

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

/// job_id → job state, behind one coarse mutex. Critical sections are short
/// and never span an await point.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new running job and hand back its cancellation token.
    pub fn insert(&self, job_id: &str, total: usize) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.lock().insert(
            job_id.to_string(),
            Job {
                status: JobStatus::Running,
                progress: 0,
                total,
                results: Vec::new(),
                cancel: cancel.clone(),
                finished_at: None,
            },
        );
        cancel
    }

    pub fn snapshot(&self, job_id: &str) -> Option<JobSnapshot> {
        self.lock().get(job_id).map(Job::snapshot)
    }

    /// Append a batch's opportunities and advance progress by `processed`,
    /// clamped to the job total. Ignored once the job is terminal.
    pub fn record_batch(&self, job_id: &str, opportunities: Vec<Opportunity>, processed: usize) {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            return;
        };
        if job.status.is_terminal() {
            return;
        }
        job.results.extend(opportunities);
        job.progress = (job.progress + processed).min(job.total);
    }

    /// Move a running job to a terminal status. Returns false if the job is
    /// unknown or already terminal.
    pub fn finish(&self, job_id: &str, status: JobStatus) -> bool {
        if !status.is_terminal() {
            return false;
        }
        let mut jobs = self.lock();
        match jobs.get_mut(job_id) {
            Some(job) if !job.status.is_terminal() => {
                job.status = status;
                job.finished_at = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Request cooperative cancellation. Returns false if the job is unknown.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock().get(job_id) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every running job; returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let jobs = self.lock();
        let mut running = 0;
        for job in jobs.values() {
            job.cancel.cancel();
            if !job.status.is_terminal() {
                running += 1;
            }
        }
        running
    }

    /// Drop terminal jobs finished more than `retention` ago. Running jobs stay.
    pub fn purge_finished(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|_, job| match job.finished_at {
            Some(at) => now.duration_since(at) < retention,
            None => true,
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn running_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|j| !j.status.is_terminal())
            .count()
    }
}
