//! In-process GetWork upstream
//!
//! Lets an embedder (or a test) play the server side: push templates to the
//! live connection, drop it, and inspect the submissions it received.

use super::{Connector, JobStream, SubmitSink};
use crate::types::{JobTemplate, SubmitParams};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

#[derive(Debug, Default)]
struct UpstreamState {
    jobs: Option<mpsc::UnboundedSender<JobTemplate>>,
    submissions: Vec<SubmitParams>,
    connections: usize,
    last_url: Option<Url>,
    refuse_connections: bool,
    fail_submissions: bool,
}

/// Shared handle to an in-process upstream; clones see the same state
#[derive(Debug, Clone, Default)]
pub struct MemoryUpstream {
    state: Arc<Mutex<UpstreamState>>,
}

impl MemoryUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a template to the live connection; false when none is open
    pub fn push_job(&self, job: JobTemplate) -> bool {
        match &self.state.lock().jobs {
            Some(jobs) => jobs.send(job).is_ok(),
            None => false,
        }
    }

    /// Close the live connection from the server side
    pub fn disconnect(&self) {
        self.state.lock().jobs = None;
    }

    /// Submissions received so far, across all connections
    pub fn submissions(&self) -> Vec<SubmitParams> {
        self.state.lock().submissions.clone()
    }

    /// Number of successful dials
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// URL used by the most recent dial
    pub fn last_url(&self) -> Option<Url> {
        self.state.lock().last_url.clone()
    }

    /// Make subsequent dials fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse_connections = refuse;
    }

    /// Make subsequent writes fail
    pub fn fail_submissions(&self, fail: bool) {
        self.state.lock().fail_submissions = fail;
    }
}

#[async_trait]
impl Connector for MemoryUpstream {
    async fn connect(&self, url: &Url) -> Result<(Box<dyn JobStream>, Box<dyn SubmitSink>)> {
        let mut state = self.state.lock();
        if state.refuse_connections {
            return Err(Error::connection(format!("connection to {} refused", url)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.jobs = Some(tx);
        state.connections += 1;
        state.last_url = Some(url.clone());

        Ok((
            Box::new(MemoryJobStream { jobs: rx }),
            Box::new(MemorySubmitSink {
                state: Arc::clone(&self.state),
                closed: false,
            }),
        ))
    }
}

struct MemoryJobStream {
    jobs: mpsc::UnboundedReceiver<JobTemplate>,
}

#[async_trait]
impl JobStream for MemoryJobStream {
    async fn next_job(&mut self) -> Option<Result<JobTemplate>> {
        self.jobs.recv().await.map(Ok)
    }
}

struct MemorySubmitSink {
    state: Arc<Mutex<UpstreamState>>,
    closed: bool,
}

#[async_trait]
impl SubmitSink for MemorySubmitSink {
    async fn submit(&mut self, params: &SubmitParams) -> Result<()> {
        if self.closed {
            return Err(Error::submission("connection is closed"));
        }

        let mut state = self.state.lock();
        if state.fail_submissions {
            return Err(Error::submission("write failed"));
        }
        state.submissions.push(params.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
