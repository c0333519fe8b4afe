use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::JOB_SWEEP_INTERVAL_SECS;
use crate::state::JobRegistry;

/// Background task that drops finished jobs once their retention has elapsed.
/// Running jobs are never touched.
pub struct JobSweeper {
    registry: Arc<JobRegistry>,
    retention: Duration,
}

impl JobSweeper {
    pub fn new(registry: Arc<JobRegistry>, retention: Duration) -> Self {
        Self { registry, retention }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(JOB_SWEEP_INTERVAL_SECS));
        interval.tick().await; // consume immediate first tick

        loop {
            interval.tick().await;
            self.sweep();
        }
    }

    fn sweep(&self) -> usize {
        let purged = self.registry.purge_finished(self.retention);
        if purged > 0 {
            info!(purged, remaining = self.registry.len(), "[SWEEP] expired jobs removed");
        } else {
            debug!(remaining = self.registry.len(), "[SWEEP] nothing to remove");
        }
        purged
    }
}
