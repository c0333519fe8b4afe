//! Batch market analysis.
//!
//! A submitted item list is split into fixed-size batches. Each batch fans out
//! one task per item to fetch its order book, joins them all, runs the analyzer,
//! and records the batch's opportunities before the next batch starts.
//! Cancellation is cooperative and only observed between batches.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analyzer;
use crate::config::MAX_BATCH_SIZE;
use crate::error::{AppError, Result};
use crate::fetcher::OrderSource;
use crate::state::JobRegistry;
use crate::types::{Constraints, Item, JobSnapshot, JobStatus, Order};

pub struct Orchestrator {
    registry: Arc<JobRegistry>,
    source: Arc<dyn OrderSource>,
    /// Lowercase substring an item's display name must contain; empty = all items.
    tradeable_marker: String,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        source: Arc<dyn OrderSource>,
        tradeable_marker: &str,
    ) -> Self {
        Self {
            registry,
            source,
            tradeable_marker: tradeable_marker.trim().to_lowercase(),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Validate, register a running job and start it in the background.
    /// Returns the job id without waiting on any network I/O.
    pub fn submit(&self, items: Vec<Item>, constraints: Constraints) -> Result<String> {
        validate(&items, &constraints)?;

        let submitted = items.len();
        let items: Vec<Item> = items
            .into_iter()
            .filter(|item| self.is_tradeable(item))
            .collect();

        let job_id = Uuid::new_v4().to_string();
        let cancel = self.registry.insert(&job_id, items.len());
        info!(
            job_id = %job_id,
            submitted,
            analysable = items.len(),
            batch_size = constraints.batch_size,
            "[JOB] submitted"
        );

        let worker = tokio::spawn(run_job(
            Arc::clone(&self.registry),
            Arc::clone(&self.source),
            job_id.clone(),
            items,
            constraints,
            cancel,
        ));
        tokio::spawn(supervise(Arc::clone(&self.registry), job_id.clone(), worker));

        Ok(job_id)
    }

    pub fn poll(&self, job_id: &str) -> Result<JobSnapshot> {
        self.registry
            .snapshot(job_id)
            .ok_or_else(|| AppError::JobNotFound(job_id.to_string()))
    }

    pub fn cancel(&self, job_id: &str) -> Result<()> {
        if self.registry.cancel(job_id) {
            info!(job_id = %job_id, "[JOB] cancellation requested");
            Ok(())
        } else {
            Err(AppError::JobNotFound(job_id.to_string()))
        }
    }

    pub fn cancel_all(&self) -> usize {
        let running = self.registry.cancel_all();
        info!(running, "[JOB] cancellation requested for all jobs");
        running
    }

    fn is_tradeable(&self, item: &Item) -> bool {
        self.tradeable_marker.is_empty()
            || item.display_name.to_lowercase().contains(&self.tradeable_marker)
    }
}

fn validate(items: &[Item], constraints: &Constraints) -> Result<()> {
    if items.is_empty() {
        return Err(AppError::InvalidSubmission("item list is empty".to_string()));
    }
    if constraints.batch_size == 0 || constraints.batch_size > MAX_BATCH_SIZE {
        return Err(AppError::InvalidSubmission(format!(
            "batch size must be between 1 and {MAX_BATCH_SIZE}, got {}",
            constraints.batch_size
        )));
    }
    if constraints.min_profit < 0 {
        return Err(AppError::InvalidSubmission(format!(
            "min profit must not be negative, got {}",
            constraints.min_profit
        )));
    }
    if constraints.max_investment < 0 {
        return Err(AppError::InvalidSubmission(format!(
            "max investment must not be negative (0 disables it), got {}",
            constraints.max_investment
        )));
    }
    Ok(())
}

async fn run_job(
    registry: Arc<JobRegistry>,
    source: Arc<dyn OrderSource>,
    job_id: String,
    items: Vec<Item>,
    constraints: Constraints,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let batch_count = items.len().div_ceil(constraints.batch_size);

    for (n, batch) in items.chunks(constraints.batch_size).enumerate() {
        if cancel.is_cancelled() {
            registry.finish(&job_id, JobStatus::Cancelled);
            info!(job_id = %job_id, batch = n + 1, batch_count, "[JOB] cancelled at batch boundary");
            return;
        }

        let batch_started = Instant::now();
        let books = fetch_batch(&source, batch).await;

        let now = Utc::now();
        let found: Vec<_> = batch
            .iter()
            .zip(&books)
            .filter_map(|(item, orders)| analyzer::find_opportunity(item, orders, &constraints, now))
            .collect();

        let opportunities = found.len();
        registry.record_batch(&job_id, found, batch.len());
        info!(
            job_id = %job_id,
            batch = n + 1,
            batch_count,
            opportunities,
            elapsed_ms = batch_started.elapsed().as_millis() as u64,
            "[JOB] batch complete"
        );
    }

    // A cancel that lands during the final batch still wins over completion.
    let status = if cancel.is_cancelled() {
        JobStatus::Cancelled
    } else {
        JobStatus::Done
    };
    registry.finish(&job_id, status);
    info!(
        job_id = %job_id,
        items = items.len(),
        %status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "[JOB] analysis finished"
    );
}

/// Waits on a job's worker. A worker that dies without reaching a terminal
/// status leaves its job cancelled so pollers never see it running forever.
async fn supervise(registry: Arc<JobRegistry>, job_id: String, worker: JoinHandle<()>) {
    if let Err(e) = worker.await {
        error!(job_id = %job_id, "[JOB] worker aborted: {e}");
        registry.cancel(&job_id);
        registry.finish(&job_id, JobStatus::Cancelled);
    }
}

/// One task per item; waits for every task. The returned books line up with `batch`.
async fn fetch_batch(source: &Arc<dyn OrderSource>, batch: &[Item]) -> Vec<Vec<Order>> {
    let mut tasks = JoinSet::new();
    for (idx, item) in batch.iter().enumerate() {
        let source = Arc::clone(source);
        let item = item.clone();
        tasks.spawn(async move {
            let orders = source.fetch_orders(&item).await;
            (idx, orders)
        });
    }

    let mut books = vec![Vec::new(); batch.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, orders)) => books[idx] = orders,
            Err(e) => warn!("[JOB] order fetch task failed: {e}"),
        }
    }
    books
}
