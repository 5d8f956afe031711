//! Session totals and the processing gate
//!
//! Totals are added once per finished batch, never per task. Status queries
//! wait on the processing gate so they observe totals between batches rather
//! than in the middle of one. Totals belong to one connection generation; a
//! batch from an older connection is not counted.

use crate::types::SessionSnapshot;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug)]
struct Totals {
    snapshot: SessionSnapshot,
    generation: u64,
}

impl Totals {
    /// Move to `generation`, zeroing the counters if it is newer
    fn advance(&mut self, generation: u64) {
        if generation > self.generation {
            self.generation = generation;
            self.snapshot.hashes = 0;
            self.snapshot.miniblocks = 0;
        }
    }
}

/// Running totals since the connection was established
#[derive(Debug)]
pub struct SessionTracker {
    totals: Mutex<Totals>,
}

impl SessionTracker {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            totals: Mutex::new(Totals {
                snapshot: SessionSnapshot {
                    version: version.into(),
                    ..Default::default()
                },
                generation: 0,
            }),
        }
    }

    /// Start the totals for connection `generation`, keeping the version tag
    ///
    /// A generation that batches have already moved to is left alone.
    pub fn begin(&self, generation: u64) {
        self.totals.lock().advance(generation);
    }

    /// Add one batch's counts in a single step; returns false when the batch
    /// ran on an older connection and was dropped
    pub fn record(&self, generation: u64, hashes: u64, miniblocks: u64) -> bool {
        let mut totals = self.totals.lock();
        if generation < totals.generation {
            return false;
        }
        totals.advance(generation);

        let snapshot = &mut totals.snapshot;
        snapshot.hashes = snapshot.hashes.saturating_add(hashes);
        snapshot.miniblocks = snapshot.miniblocks.saturating_add(miniblocks);
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.totals.lock().snapshot.clone()
    }
}

/// Gate that is closed while any batch is in flight
///
/// Counts in-flight batches so overlapping callers do not reopen the gate
/// while another batch is still running.
#[derive(Debug)]
pub struct ProcessingFlag {
    in_flight: watch::Sender<usize>,
}

impl ProcessingFlag {
    pub fn new() -> Self {
        let (in_flight, _) = watch::channel(0);
        Self { in_flight }
    }

    /// Mark a batch as in flight until the returned guard drops
    pub fn enter(&self) -> ProcessingGuard<'_> {
        self.in_flight.send_modify(|n| *n += 1);
        ProcessingGuard { flag: self }
    }

    pub fn is_processing(&self) -> bool {
        *self.in_flight.borrow() > 0
    }

    /// Wait until no batch is in flight
    pub async fn wait_idle(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.in_flight.subscribe();

        let waited = tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
            .await
            .map(|seen| seen.map(|_| ()));

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::invalid_state("processing flag closed")),
            Err(_) => Err(Error::timeout(format!(
                "could not get EPOCH session after {:?}",
                timeout
            ))),
        }
    }
}

impl Default for ProcessingFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears one in-flight mark on drop
#[derive(Debug)]
pub struct ProcessingGuard<'a> {
    flag: &'a ProcessingFlag,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}
