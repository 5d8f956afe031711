//! Bounded fan-out shared by the attempt and submit paths
//!
//! Tasks are launched in order, each holding one admission permit. The first
//! task error stops further launches; tasks already running finish normally.
//! All tasks are joined before the batch returns.

use crate::admission::AdmissionController;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::debug;

/// What happened in one batch
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Tasks started
    pub launched: u64,
    /// Tasks that finished without error
    pub completed: u64,
    /// Tasks whose work passed the target and was written upstream
    pub submitted: u64,
    /// First task error observed
    pub error: Option<Error>,
    pub elapsed: Duration,
}

#[derive(Default)]
struct BatchState {
    failed: AtomicBool,
    first_error: Mutex<Option<Error>>,
    completed: AtomicU64,
    submitted: AtomicU64,
}

impl BatchState {
    fn record_error(&self, error: Error) {
        let mut first = self.first_error.lock();
        if first.is_none() {
            *first = Some(error);
        }
        self.failed.store(true, Ordering::Release);
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// Run `task` once per item, at most `admission.capacity()` at a time
///
/// A task resolves to `Ok(true)` when it submitted a valid result,
/// `Ok(false)` when it ran but had nothing to submit.
pub async fn run_batch<I, F, Fut>(admission: &AdmissionController, items: I, task: F) -> BatchOutcome
where
    I: IntoIterator,
    F: Fn(I::Item) -> Fut,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    let state = Arc::new(BatchState::default());
    let mut tasks = JoinSet::new();
    let mut launched = 0u64;
    let started = Instant::now();

    for item in items {
        if state.has_failed() {
            break;
        }

        let permit = match admission.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                state.record_error(e);
                break;
            }
        };

        // An earlier task may have failed while this one waited for a slot
        if state.has_failed() {
            break;
        }

        let work = task(item);
        let state = Arc::clone(&state);
        tasks.spawn(async move {
            let _permit = permit;
            match work.await {
                Ok(submitted) => {
                    state.completed.fetch_add(1, Ordering::Relaxed);
                    if submitted {
                        state.submitted.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => state.record_error(e),
            }
        });
        launched += 1;
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            state.record_error(Error::invalid_state(format!("task aborted: {}", e)));
        }
    }

    let elapsed = started.elapsed();
    let outcome = BatchOutcome {
        launched,
        completed: state.completed.load(Ordering::Relaxed),
        submitted: state.submitted.load(Ordering::Relaxed),
        error: state.first_error.lock().take(),
        elapsed,
    };

    debug!(
        launched = outcome.launched,
        completed = outcome.completed,
        submitted = outcome.submitted,
        failed = outcome.error.is_some(),
        elapsed_ms = elapsed.as_millis() as u64,
        "batch finished"
    );

    outcome
}
