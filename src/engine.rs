//! EPOCH engine handle
//!
//! Ties the connection, job store, admission control and session totals into
//! one caller-owned object. Any number of callers may share an `Arc<Engine>`
//! and run batches against the same session concurrently.

use crate::address::{AddressValidator, DeroAddressValidator};
use crate::admission::AdmissionController;
use crate::config::{clamp_threads, validate_max_hashes, validate_port, EngineConfig};
use crate::connection::ConnectionManager;
use crate::dispatch::{run_batch, BatchOutcome};
use crate::job::JobStore;
use crate::pow::{self, Blake2sPow, PowHasher};
use crate::session::{ProcessingFlag, SessionTracker};
use crate::transport::{Connector, WebSocketConnector};
use crate::types::{BatchResult, JobTemplate, PrecomputedHash, SessionSnapshot, SubmitParams};
use crate::utils::{compute_hash_rate, round_rate};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tracing::{debug, info};
use url::Url;

/// Builder for [`Engine`] with replaceable collaborators
pub struct EngineBuilder {
    config: EngineConfig,
    connector: Option<Arc<dyn Connector>>,
    hasher: Option<Arc<dyn PowHasher>>,
    validator: Option<Arc<dyn AddressValidator>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            connector: None,
            hasher: None,
            validator: None,
        }
    }

    /// Transport used to reach the GetWork server
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Proof-of-work hash function
    pub fn hasher(mut self, hasher: impl PowHasher + 'static) -> Self {
        self.hasher = Some(Arc::new(hasher));
        self
    }

    /// Reward address validator
    pub fn address_validator(mut self, validator: impl AddressValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn build(self) -> Result<Engine> {
        let config = self.config.normalized()?;

        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(DeroAddressValidator));
        if !config.address.is_empty() {
            validator.validate(&config.address)?;
        }

        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::new(config.insecure)));
        let hasher = self.hasher.unwrap_or_else(|| Arc::new(Blake2sPow));

        Ok(Engine {
            admission: RwLock::new(AdmissionController::new(config.max_threads)),
            config: RwLock::new(config),
            jobs: Arc::new(JobStore::new()),
            connection: ConnectionManager::new(),
            session: SessionTracker::new(crate::APP_VERSION),
            processing: ProcessingFlag::new(),
            connector,
            hasher,
            validator,
        })
    }
}

/// Work distribution engine for one GetWork upstream
pub struct Engine {
    config: RwLock<EngineConfig>,
    jobs: Arc<JobStore>,
    connection: ConnectionManager,
    admission: RwLock<AdmissionController>,
    session: SessionTracker,
    processing: ProcessingFlag,
    connector: Arc<dyn Connector>,
    hasher: Arc<dyn PowHasher>,
    validator: Arc<dyn AddressValidator>,
}

impl Engine {
    /// Engine with the WebSocket transport, Blake2s hasher and DERO validator
    pub fn new(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    // Lifecycle

    /// Connect to the GetWork server on `endpoint`'s host
    ///
    /// `endpoint` is a daemon `host:port`; its port is replaced by the
    /// configured GetWork port. A non-empty `address` replaces the configured
    /// reward address first. Batches left over from a previous connection are
    /// drained before the worker limit is resized, and session totals are
    /// zeroed once connected.
    pub async fn start(&self, address: &str, endpoint: &str) -> Result<()> {
        if self.is_active() {
            return Err(Error::AlreadyActive);
        }

        let host = split_host(endpoint)?;

        if !address.is_empty() {
            self.set_address(address)
                .map_err(|e| Error::address(format!("could not set address: {}", e)))?;
        }

        let config = self.config.read().clone();
        self.validator.validate(&config.address).map_err(|e| {
            Error::address(format!("address {:?} is not valid: {}", config.address, e))
        })?;

        let url = work_url(&host, config.port, &config.address)?;

        self.processing
            .wait_idle(config.dial_timeout)
            .await
            .map_err(|_| {
                Error::invalid_state("batches from the previous connection are still running")
            })?;
        self.resize_admission(config.max_threads);

        let generation = self
            .connection
            .connect(
                self.connector.as_ref(),
                url,
                config.dial_timeout,
                Arc::clone(&self.jobs),
            )
            .await?;

        self.session.begin(generation);
        info!("[EPOCH] Will use {} threads", self.admission.read().capacity());

        Ok(())
    }

    /// Swap in a semaphore of `threads` slots while no batch holds the old one
    fn resize_admission(&self, threads: usize) {
        let mut admission = self.admission.write();
        if admission.capacity() == threads {
            return;
        }
        // Batches clone the controller after entering the processing gate
        if self.is_active() || self.is_processing() {
            debug!("keeping {} worker slots while batches run", admission.capacity());
            return;
        }
        *admission = AdmissionController::new(threads);
    }

    /// Close the connection; no-op when inactive
    ///
    /// Batches still in flight end on their next submission check.
    pub async fn stop(&self) {
        self.connection.stop().await;
    }

    pub fn is_active(&self) -> bool {
        self.connection.is_active()
    }

    /// True while any batch is in flight
    pub fn is_processing(&self) -> bool {
        self.processing.is_processing()
    }

    /// Wait until a job with a non-empty id has arrived
    pub async fn wait_for_job(&self, timeout: Duration) -> Result<()> {
        self.jobs.wait_for_job(timeout).await
    }

    /// Copy of the current job template
    pub fn get_job(&self) -> JobTemplate {
        self.jobs.get_job()
    }

    /// Session totals, waiting up to `timeout` for in-flight batches
    pub async fn get_session(&self, timeout: Duration) -> Result<SessionSnapshot> {
        self.processing.wait_idle(timeout).await?;
        Ok(self.session.snapshot())
    }

    // Batches

    /// Hash `hashes` fresh attempts against the current job, submitting
    /// every result that meets its difficulty
    pub async fn attempt_hashes(&self, hashes: usize) -> Result<BatchResult> {
        let _processing = self.processing.enter();
        let generation = self.check_batch(hashes)?;
        let admission = self.admission.read().clone();

        let outcome = run_batch(&admission, 0..hashes, |_| {
            let jobs = Arc::clone(&self.jobs);
            let hasher = Arc::clone(&self.hasher);
            let connection = self.connection.clone();
            async move {
                if connection.generation() != Some(generation) {
                    return Err(Error::submission("connection is closed"));
                }
                let job = jobs.get_job();
                let blocking = Arc::clone(&hasher);
                let attempt = task::spawn_blocking(move || pow::compute(job, blocking.as_ref()))
                    .await
                    .map_err(|e| Error::invalid_state(format!("hash task failed: {}", e)))??;
                submit_block(&connection, generation, hasher.as_ref(), &attempt).await
            }
        })
        .await;

        self.record(generation, outcome.launched, outcome.submitted);

        let rate = round_rate(compute_hash_rate(outcome.launched, outcome.elapsed));
        Ok(batch_result(outcome.launched, rate, outcome))
    }

    /// Check and submit precomputed hashes; only the miniblock total grows
    pub async fn submit_hashes(&self, params: Vec<PrecomputedHash>) -> Result<BatchResult> {
        let _processing = self.processing.enter();
        let generation = self.check_batch(params.len())?;
        let admission = self.admission.read().clone();

        let outcome = run_batch(&admission, params, |attempt| {
            let hasher = Arc::clone(&self.hasher);
            let connection = self.connection.clone();
            async move { submit_block(&connection, generation, hasher.as_ref(), &attempt).await }
        })
        .await;

        self.record(generation, 0, outcome.submitted);

        Ok(batch_result(outcome.completed, 0.0, outcome))
    }

    /// Generation of the connection a batch of `requested` items runs on
    fn check_batch(&self, requested: usize) -> Result<u64> {
        let generation = self.connection.generation().ok_or(Error::Inactive)?;

        let limit = self.max_hashes();
        if requested > limit {
            return Err(Error::capacity(requested, limit));
        }
        Ok(generation)
    }

    fn record(&self, generation: u64, hashes: u64, miniblocks: u64) {
        if !self.session.record(generation, hashes, miniblocks) {
            debug!(generation, "dropping totals of a batch from a closed connection");
        }
    }

    // Configuration

    /// Snapshot of the runtime settings
    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    pub fn address(&self) -> String {
        self.config.read().address.clone()
    }

    /// Set the reward address; rejected unless it validates
    pub fn set_address(&self, address: &str) -> Result<()> {
        self.validator.validate(address)?;
        self.config.write().address = address.to_string();
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.config.read().port
    }

    /// Set the GetWork port used by the next `start`
    pub fn set_port(&self, port: u32) -> Result<()> {
        let port = validate_port(port)?;
        self.config.write().port = port;
        Ok(())
    }

    pub fn max_threads(&self) -> usize {
        self.config.read().max_threads
    }

    /// Set the worker ceiling used by the next `start`, returning the
    /// clamped value
    pub fn set_max_threads(&self, threads: usize) -> usize {
        let threads = clamp_threads(threads);
        self.config.write().max_threads = threads;
        threads
    }

    pub fn max_hashes(&self) -> usize {
        self.config.read().max_hashes
    }

    pub fn set_max_hashes(&self, max_hashes: usize) -> Result<()> {
        let max_hashes = validate_max_hashes(max_hashes)?;
        self.config.write().max_hashes = max_hashes;
        Ok(())
    }
}

/// Check one attempt against its difficulty and write it upstream when it
/// passes. The check is local; the daemon may still reject the miniblock.
async fn submit_block(
    connection: &ConnectionManager,
    generation: u64,
    hasher: &dyn PowHasher,
    attempt: &PrecomputedHash,
) -> Result<bool> {
    if connection.generation() != Some(generation) {
        return Err(Error::submission("connection is closed"));
    }

    if !hasher.meets_difficulty(&attempt.pow_hash, &attempt.difficulty) {
        return Ok(false);
    }

    info!(
        "[EPOCH] Submitting valid miniblock POW hash, difficulty: {} height: {}",
        attempt.difficulty, attempt.job.height
    );

    let params = SubmitParams {
        job_id: attempt.job.job_id.clone(),
        miniblock_blob: attempt.work.to_hex(),
    };
    connection.submit(generation, &params).await?;
    Ok(true)
}

fn batch_result(hashes: u64, hash_per_sec: f64, outcome: BatchOutcome) -> BatchResult {
    if let Some(e) = &outcome.error {
        debug!(category = e.category(), "batch stopped early: {}", e);
    }

    BatchResult {
        hashes,
        submitted: outcome.submitted,
        duration_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
        hash_per_sec,
        error: outcome.error,
    }
}

/// Host part of a `host:port` endpoint; IPv6 hosts are bracketed
fn split_host(endpoint: &str) -> Result<String> {
    let invalid = |reason: &str| {
        Error::endpoint(format!("could not get host: address {}: {}", endpoint, reason))
    };

    if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("missing ']' in address"))?;
        if !tail.starts_with(':') {
            return Err(invalid("missing port in address"));
        }
        if tail[1..].contains(':') {
            return Err(invalid("too many colons in address"));
        }
        return Ok(host.to_string());
    }

    let (host, _) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port in address"))?;
    if host.contains(':') {
        return Err(invalid("too many colons in address"));
    }
    if host.contains('[') || host.contains(']') {
        return Err(invalid("unexpected bracket in address"));
    }
    Ok(host.to_string())
}

/// `wss://host:port/ws/<address>`
fn work_url(host: &str, port: u16, address: &str) -> Result<Url> {
    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };

    Url::parse(&format!("wss://{}:{}/ws/{}", host, port, address))
        .map_err(|e| Error::endpoint(format!("invalid GetWork URL: {}", e)))
}
