//! Job store holding the current block template
//!
//! The connection's read loop is the only writer. Readers always receive a
//! copy, so a template is never mutated once stored.

use crate::types::JobTemplate;
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Single-slot store for the most recently received template
#[derive(Debug)]
pub struct JobStore {
    current: watch::Sender<JobTemplate>,
}

impl JobStore {
    pub fn new() -> Self {
        let (current, _) = watch::channel(JobTemplate::default());
        Self { current }
    }

    /// Replace the stored template and return its last error for logging
    pub fn set_job(&self, job: JobTemplate) -> String {
        let last_error = job.last_error.clone();
        debug!(job_id = %job.job_id, height = job.height, "new job");
        self.current.send_replace(job);
        last_error
    }

    /// Copy of the current template
    pub fn get_job(&self) -> JobTemplate {
        self.current.borrow().clone()
    }

    /// Forget the current template
    pub fn clear(&self) {
        self.current.send_replace(JobTemplate::default());
    }

    /// Wait until a template with a job id is stored
    pub async fn wait_for_job(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.current.subscribe();

        let waited = tokio::time::timeout(timeout, rx.wait_for(JobTemplate::is_ready))
            .await
            .map(|seen| seen.map(|_| ()));

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::invalid_state("job store closed")),
            Err(_) => Err(Error::timeout(format!(
                "could not get EPOCH job after {:?}",
                timeout
            ))),
        }
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
