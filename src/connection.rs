//! Connection manager for the GetWork stream
//!
//! Owns the single live connection: the read loop that feeds the job store,
//! and the writer half that submissions share behind an exclusive lock.
//! Every installed connection gets a new generation number, so work tied to
//! one connection never leaks into the next.

use crate::job::JobStore;
use crate::transport::{Connector, JobStream, SubmitSink};
use crate::types::SubmitParams;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

type Slot = Arc<Mutex<Option<Arc<Link>>>>;

/// One established connection
struct Link {
    generation: u64,
    url: Url,
    sink: tokio::sync::Mutex<Box<dyn SubmitSink>>,
    shutdown: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    async fn close_sink(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("error closing GetWork stream: {}", e);
        }
    }
}

/// Holds at most one live connection; clones share it
#[derive(Clone, Default)]
pub struct ConnectionManager {
    slot: Slot,
    generations: Arc<AtomicU64>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Generation of the live connection
    pub fn generation(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(|link| link.generation)
    }

    /// URL of the live connection
    pub fn url(&self) -> Option<Url> {
        self.slot.lock().as_ref().map(|link| link.url.clone())
    }

    /// Dial `url` and start the read loop feeding `jobs`
    ///
    /// `jobs` is cleared only once the new connection is installed, so a
    /// failed dial keeps the previous template. Returns the generation of the
    /// new connection.
    #[instrument(skip(self, connector, url, jobs), fields(url = %url))]
    pub async fn connect(
        &self,
        connector: &dyn Connector,
        url: Url,
        dial_timeout: Duration,
        jobs: Arc<JobStore>,
    ) -> Result<u64> {
        if self.is_active() {
            return Err(Error::AlreadyActive);
        }

        let (stream, sink) = tokio::time::timeout(dial_timeout, connector.connect(&url))
            .await
            .map_err(|_| Error::connection(format!("dial timed out after {:?}", dial_timeout)))??;

        // Generations are handed out under the slot lock so they only grow
        let installed = {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                Err(sink)
            } else {
                let link = Arc::new(Link {
                    generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
                    url,
                    sink: tokio::sync::Mutex::new(sink),
                    shutdown: CancellationToken::new(),
                    reader: Mutex::new(None),
                });
                *slot = Some(Arc::clone(&link));
                Ok(link)
            }
        };

        let link = match installed {
            Ok(link) => link,
            // Lost a race with a concurrent connect
            Err(mut sink) => {
                if let Err(e) = sink.close().await {
                    debug!("error closing GetWork stream: {}", e);
                }
                return Err(Error::AlreadyActive);
            }
        };

        jobs.clear();

        let handle = tokio::spawn(read_loop(
            Arc::clone(&link),
            stream,
            Arc::clone(&self.slot),
            jobs,
        ));
        *link.reader.lock() = Some(handle);

        info!("[EPOCH] Connected to {}", link.url);
        Ok(link.generation)
    }

    /// Write one submission on connection `generation` while holding the
    /// writer lock
    pub async fn submit(&self, generation: u64, params: &SubmitParams) -> Result<()> {
        let link = self.slot.lock().clone().ok_or(Error::Inactive)?;
        if link.generation != generation {
            return Err(Error::submission("connection was replaced"));
        }

        let mut sink = link.sink.lock().await;
        sink.submit(params).await
    }

    /// Close the live connection and join its read loop; no-op when inactive
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let Some(link) = self.slot.lock().take() else {
            return;
        };

        link.shutdown.cancel();
        link.close_sink().await;

        let reader = link.reader.lock().take();
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                warn!("GetWork read loop ended abnormally: {}", e);
            }
        }
    }
}

/// Clears the slot on every exit path of the read loop, unwinding included
struct Teardown {
    link: Arc<Link>,
    slot: Slot,
}

impl Teardown {
    /// Release the slot if it still holds this connection
    fn release(&self) -> bool {
        self.link.shutdown.cancel();
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, &self.link) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.release();
    }
}

async fn read_loop(link: Arc<Link>, mut stream: Box<dyn JobStream>, slot: Slot, jobs: Arc<JobStore>) {
    let teardown = Teardown {
        link: Arc::clone(&link),
        slot,
    };

    loop {
        tokio::select! {
            _ = link.shutdown.cancelled() => break,
            next = stream.next_job() => match next {
                Some(Ok(job)) => {
                    let last_error = jobs.set_job(job);
                    if !last_error.is_empty() {
                        warn!("[EPOCH] Job error: {}", last_error);
                    }
                }
                Some(Err(e)) => {
                    error!("[EPOCH] connection error: {}", e);
                    break;
                }
                None => {
                    debug!("GetWork stream ended");
                    break;
                }
            }
        }
    }

    // Upstream went away on its own; stop() closes the writer otherwise
    if teardown.release() {
        link.close_sink().await;
    }

    info!("[EPOCH] Closed");
}
